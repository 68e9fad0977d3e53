use pdfstruct::{Document, EntryStatus, Error, Object, XrefEntry, XrefError};
use std::io::Write;

mod utils;
use utils::{PREV_MARKER, PdfBuilder, deflate, init_logger, simple_document};

#[test]
fn single_table_lists_every_declared_object() {
    init_logger();
    let mut pdf = PdfBuilder::new("1.4");
    let catalog = pdf.object(1, "<< /Type /Catalog /Pages 2 0 R >>");
    let pages = pdf.object(2, "<< /Type /Pages /Kids [] /Count 0 >>");
    let font = pdf.object_with_generation(3, 2, "<< /Type /Font /BaseFont /Courier >>");
    let xref = pdf.xref_table("/Size 4 /Root 1 0 R");
    pdf.startxref(xref);
    let document = Document::from_bytes(pdf.finish());

    let table = document.build_xref_table().unwrap();
    assert_eq!(table.len(), 4);
    assert_eq!(table[&(0, 65535)].status(), EntryStatus::Free);
    assert_eq!(table[&(1, 0)], XrefEntry::Normal { offset: catalog, generation: 0 });
    assert_eq!(table[&(2, 0)], XrefEntry::Normal { offset: pages, generation: 0 });
    assert_eq!(table[&(3, 2)], XrefEntry::Normal { offset: font, generation: 2 });

    assert_eq!(document.locate_xref_start().unwrap(), xref);
    assert_eq!(document.startxref_offset().unwrap(), xref);
    assert_eq!(document.version().unwrap(), "1.4");

    let font = document.get_object((3, 2)).unwrap();
    assert_eq!(font.as_dict().unwrap().get(b"BaseFont").unwrap().as_name().unwrap(), b"Courier");
    assert!(matches!(document.get_object((3, 0)), Err(Error::ObjectNotFound((3, 0)))));
    assert!(matches!(document.get_object((9, 0)), Err(Error::ObjectNotFound((9, 0)))));
}

#[test]
fn newest_revision_wins_across_updates() {
    init_logger();
    let mut pdf = PdfBuilder::new("1.4");
    pdf.object(1, "<< /Type /Catalog /Pages 2 0 R >>");
    pdf.object(2, "<< /Type /Pages /Kids [] /Count 0 >>");
    pdf.object(3, "(first)");
    pdf.object(4, "(kept)");
    let first = pdf.xref_table("/Size 5 /Root 1 0 R /Info 4 0 R");
    pdf.startxref(first);

    pdf.object(3, "(second)");
    let second = pdf.xref_table(&format!("/Size 5 /Root 1 0 R /Prev {first}"));
    pdf.startxref(second);

    let third_offset = pdf.object(3, "(third)");
    pdf.free(4, 1);
    let third = pdf.xref_table(&format!("/Size 5 /Root 1 0 R /Prev {second}"));
    pdf.startxref(third);

    let document = Document::from_bytes(pdf.finish());
    assert_eq!(document.locate_xref_start().unwrap(), third);

    let xref = document.xref().unwrap();
    assert_eq!(xref.get_entry(3), Some(&XrefEntry::Normal { offset: third_offset, generation: 0 }));
    assert_eq!(xref.get_entry(4).map(XrefEntry::status), Some(EntryStatus::Free));
    assert_eq!(document.get_object((3, 0)).unwrap(), Object::string_literal("third"));
    assert!(matches!(document.get_object((4, 0)), Err(Error::ObjectNotFound(_))));

    let trailer = document.trailer().unwrap();
    assert_eq!(trailer.prev, Some(second));
    // Only the first revision names an Info dictionary.
    assert_eq!(trailer.info, Some((4, 0)));
}

#[test]
fn startxref_pointing_at_nothing_is_rejected() {
    init_logger();
    let (data, _) = simple_document();
    let trailer = data.windows(7).rposition(|w| w == b"trailer").unwrap();
    let tail_start = data.windows(9).rposition(|w| w == b"startxref").unwrap();
    let mut broken = data[..tail_start].to_vec();
    broken.extend_from_slice(format!("startxref\n{trailer}\n%%EOF\n").as_bytes());

    let document = Document::from_bytes(broken);
    assert_eq!(document.startxref_offset().unwrap(), trailer as u64);
    assert!(matches!(document.locate_xref_start(), Err(Error::Xref(XrefError::Start))));
    assert!(matches!(document.trailer(), Err(Error::Xref(XrefError::Start))));
}

#[test]
fn offset_outside_the_source() {
    let (mut data, _) = simple_document();
    let tail_start = data.windows(9).rposition(|w| w == b"startxref").unwrap();
    data.truncate(tail_start);
    data.extend_from_slice(b"startxref\n999999\n%%EOF\n");
    let document = Document::from_bytes(data);
    assert!(matches!(document.xref(), Err(Error::Xref(XrefError::Start))));

    let (data, _) = simple_document();
    let document = Document::from_bytes(data);
    assert!(matches!(
        document.get_dictionary(1 << 20),
        Err(Error::InvalidOffset { offset: 1_048_576, .. })
    ));
}

#[test]
fn prev_cycle_stops_loading() {
    init_logger();
    let mut pdf = PdfBuilder::new("1.4");
    pdf.object(1, "<< /Type /Catalog >>");
    let first = pdf.xref_table(&format!("/Size 2 /Root 1 0 R /Prev {PREV_MARKER}"));
    pdf.object(1, "<< /Type /Catalog /Version /1.5 >>");
    let second = pdf.xref_table(&format!("/Size 2 /Root 1 0 R /Prev {first}"));
    pdf.patch_prev(second);
    pdf.startxref(second);

    let document = Document::from_bytes(pdf.finish());
    let err = document.trailer().unwrap_err();
    assert!(matches!(err, Error::Xref(XrefError::Cycle(offset)) if offset == second));
}

#[test]
fn trailer_is_required() {
    let mut pdf = PdfBuilder::new("1.4");
    pdf.object(1, "<< /Type /Catalog >>");
    let xref = pdf.xref_table("/Size 2 /Root 1 0 R");
    let mut data = pdf.finish();
    let trailer = data.windows(7).rposition(|w| w == b"trailer").unwrap();
    data.truncate(trailer);
    data.extend_from_slice(format!("startxref\n{xref}\n%%EOF\n").as_bytes());

    let document = Document::from_bytes(data);
    assert!(matches!(document.trailer(), Err(Error::Trailer)));
}

#[test]
fn dictionaries_by_offset() {
    let mut pdf = PdfBuilder::new("1.4");
    pdf.object(1, "<< /Type /Catalog /Pages 2 0 R >>");
    let pages = pdf.object(
        2,
        "<< /Type /Pages /Kids [] /Count 0 /Resources << /Font << /F1 (a >> b) >> >> /Extra 5 >>",
    );
    let xref = pdf.xref_table("/Size 3 /Root 1 0 R");
    pdf.startxref(xref);
    let document = Document::from_bytes(pdf.finish());

    let dict = document.get_dictionary(pages).unwrap();
    assert!(dict.has_type(b"Pages"));
    assert_eq!(dict.get(b"Extra").unwrap(), &Object::Integer(5));
    let resources = dict.get(b"Resources").unwrap().as_dict().unwrap();
    let fonts = resources.get(b"Font").unwrap().as_dict().unwrap();
    assert_eq!(fonts.get(b"F1").unwrap().as_str().unwrap(), b"a >> b");

    // From the table offset, the first dictionary is the trailer.
    let trailer = document.get_dictionary(xref).unwrap();
    assert_eq!(trailer.get(b"Root").unwrap(), &Object::Reference((1, 0)));
}

#[test]
fn references_need_a_resolver() {
    let (data, _) = simple_document();
    let document = Document::from_bytes(data);

    let mut raw = document.trailer_dictionary().unwrap();
    assert!(matches!(raw.resolve_references(None), Err(Error::MissingResolver)));

    let resolved = document.resolved_trailer_dictionary().unwrap();
    let info = resolved.get(b"Info").unwrap().as_dict().unwrap();
    assert_eq!(info.get(b"Title").unwrap().as_str().unwrap(), b"Synthetic");
    let catalog = resolved.get(b"Root").unwrap().as_dict().unwrap();
    // One level only.
    assert_eq!(catalog.get(b"Pages").unwrap(), &Object::Reference((2, 0)));
}

#[test]
fn streams_are_decoded() {
    init_logger();
    let text = b"BT /F1 12 Tf 72 712 Td (Hello, PDF) Tj ET".repeat(20);
    let mut pdf = PdfBuilder::new("1.5");
    pdf.object(1, "<< /Type /Catalog >>");
    let plain = pdf.stream(2, "", &text, false);
    let compressed = pdf.stream(3, "", &text, true);
    // Two rows of three grey pixels, each row filtered with PNG Up.
    let image = deflate(&[2, 10, 20, 30, 2, 5, 5, 5]);
    let mut body = format!(
        "<< /Filter /FlateDecode /DecodeParms << /Predictor 12 /Columns 3 >> /Length {} >>\nstream\n",
        image.len()
    )
    .into_bytes();
    body.extend_from_slice(&image);
    body.extend_from_slice(b"\nendstream");
    let predicted = pdf.len();
    pdf.raw(b"4 0 obj\n").raw(&body).raw(b"\nendobj\n");
    let indirect = pdf.object(5, "<< /Length 6 0 R >>\nstream\nhello world\nendstream");
    pdf.object(6, "11");
    let xref = pdf.xref_table("/Size 7 /Root 1 0 R");
    pdf.startxref(xref);
    let document = Document::from_bytes(pdf.finish());

    assert_eq!(document.get_stream(plain).unwrap(), text);
    assert_eq!(document.get_stream(compressed).unwrap(), text);
    assert_eq!(document.get_stream(predicted).unwrap(), vec![10, 20, 30, 15, 25, 35]);
    assert_eq!(document.get_stream(indirect).unwrap(), b"hello world");

    let (id, object) = document.read_object_at(compressed).unwrap();
    assert_eq!(id, (3, 0));
    let stream = object.as_stream().unwrap();
    assert!(stream.is_compressed());
    assert_eq!(stream.filters().unwrap(), vec![&b"FlateDecode"[..]]);
}

#[test]
fn file_backed_document() {
    let (data, xref) = simple_document();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&data).unwrap();
    file.flush().unwrap();

    let document = Document::open(file.path()).unwrap();
    assert_eq!(document.len(), data.len() as u64);
    assert_eq!(document.locate_xref_start().unwrap(), xref);
    let page = document.get_object((3, 0)).unwrap();
    assert_eq!(page.as_dict().unwrap().get(b"Parent").unwrap(), &Object::Reference((2, 0)));
}

#[test]
fn shared_between_threads() {
    let (data, _) = simple_document();
    let document = Document::from_bytes(data);
    std::thread::scope(|scope| {
        for number in 1..=4 {
            let document = &document;
            scope.spawn(move || {
                for _ in 0..20 {
                    let object = document.get_object((number, 0)).unwrap();
                    assert!(object.as_dict().is_ok());
                }
            });
        }
    });
}

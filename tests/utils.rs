use flate2::Compression;
use flate2::write::ZlibEncoder;
use std::collections::BTreeMap;
use std::io::Write;
use std::mem;

/// Placeholder for an offset that is only known after more of the file is written.
#[allow(dead_code)]
pub const PREV_MARKER: &str = "@@PREV@@@@";

#[derive(Debug, Clone, Copy)]
enum Entry {
    Free(u16),
    Normal(u64, u16),
    Compressed(u32, u32),
}

/// Writes synthetic PDF files in memory. Every section lists the objects written
/// (or freed) since the previous section.
pub struct PdfBuilder {
    data: Vec<u8>,
    pending: BTreeMap<u32, Entry>,
    max_number: u32,
    sections: usize,
    predict_xref_streams: bool,
}

#[allow(dead_code)]
impl PdfBuilder {
    pub fn new(version: &str) -> PdfBuilder {
        let mut data = format!("%PDF-{version}\n").into_bytes();
        data.extend_from_slice(b"%\xe2\xe3\xcf\xd3\n");
        PdfBuilder {
            data,
            pending: BTreeMap::new(),
            max_number: 0,
            sections: 0,
            predict_xref_streams: false,
        }
    }

    /// Write cross-reference stream records PNG Up-filtered, as most producers do.
    pub fn predict_xref_streams(&mut self) -> &mut Self {
        self.predict_xref_streams = true;
        self
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.data.extend_from_slice(bytes);
        self
    }

    fn record(&mut self, number: u32, entry: Entry) {
        self.max_number = self.max_number.max(number);
        self.pending.insert(number, entry);
    }

    pub fn object_with_generation(&mut self, number: u32, generation: u16, body: &str) -> u64 {
        let offset = self.len();
        self.data
            .extend_from_slice(format!("{number} {generation} obj\n{body}\nendobj\n").as_bytes());
        self.record(number, Entry::Normal(offset, generation));
        offset
    }

    pub fn object(&mut self, number: u32, body: &str) -> u64 {
        self.object_with_generation(number, 0, body)
    }

    /// A stream object; `dict` holds the entries besides `Length` (and `Filter` when compressed).
    pub fn stream(&mut self, number: u32, dict: &str, content: &[u8], compress: bool) -> u64 {
        let (content, filter) = if compress {
            (deflate(content), " /Filter /FlateDecode")
        } else {
            (content.to_vec(), "")
        };
        let offset = self.len();
        self.data.extend_from_slice(
            format!("{number} 0 obj\n<< {dict}{filter} /Length {} >>\nstream\n", content.len()).as_bytes(),
        );
        self.data.extend_from_slice(&content);
        self.data.extend_from_slice(b"\nendstream\nendobj\n");
        self.record(number, Entry::Normal(offset, 0));
        offset
    }

    /// A compressed object stream holding `objects` in order.
    pub fn object_stream(&mut self, number: u32, objects: &[(u32, &str)]) -> u64 {
        let mut header = String::new();
        let mut body = String::new();
        for (index, &(member, text)) in objects.iter().enumerate() {
            header.push_str(&format!("{member} {} ", body.len()));
            body.push_str(text);
            body.push(' ');
            self.record(member, Entry::Compressed(number, index as u32));
        }
        let dict = format!("/Type /ObjStm /N {} /First {}", objects.len(), header.len());
        self.stream(number, &dict, format!("{header}{body}").as_bytes(), true)
    }

    pub fn free(&mut self, number: u32, next_generation: u16) {
        self.record(number, Entry::Free(next_generation));
    }

    /// Consecutive runs of object numbers as `(first, count)`.
    fn runs(numbers: &[u32]) -> Vec<(u32, u32)> {
        let mut runs: Vec<(u32, u32)> = Vec::new();
        for &number in numbers {
            match runs.last_mut() {
                Some((first, count)) if *first + *count == number => *count += 1,
                _ => runs.push((number, 1)),
            }
        }
        runs
    }

    /// Pending entries for the next section; classic tables cannot list compressed objects.
    fn take_entries(&mut self, include_compressed: bool) -> BTreeMap<u32, Entry> {
        let mut entries = BTreeMap::new();
        if self.sections == 0 {
            entries.insert(0, Entry::Free(65535));
        }
        let (taken, kept): (BTreeMap<u32, Entry>, BTreeMap<u32, Entry>) = mem::take(&mut self.pending)
            .into_iter()
            .partition(|(_, entry)| include_compressed || !matches!(entry, Entry::Compressed(..)));
        self.pending = kept;
        entries.extend(taken);
        self.sections += 1;
        entries
    }

    /// A classic table of the pending (non-compressed) entries followed by `trailer << {trailer} >>`.
    pub fn xref_table(&mut self, trailer: &str) -> u64 {
        let entries = self.take_entries(false);
        let offset = self.len();
        let numbers: Vec<u32> = entries.keys().copied().collect();
        let mut table = String::from("xref\n");
        let mut next = numbers.iter();
        for (first, count) in Self::runs(&numbers) {
            table.push_str(&format!("{first} {count}\n"));
            for number in next.by_ref().take(count as usize) {
                match entries[number] {
                    Entry::Free(generation) => table.push_str(&format!("0000000000 {generation:05} f \n")),
                    Entry::Normal(offset, generation) => {
                        table.push_str(&format!("{offset:010} {generation:05} n \n"))
                    }
                    Entry::Compressed(..) => unreachable!(),
                }
            }
        }
        table.push_str(&format!("trailer\n<< {trailer} >>\n"));
        self.data.extend_from_slice(table.as_bytes());
        offset
    }

    /// A cross-reference stream object `number` holding every pending entry and itself.
    pub fn xref_stream(&mut self, number: u32, extra: &str) -> u64 {
        let offset = self.len();
        self.record(number, Entry::Normal(offset, 0));
        let entries = self.take_entries(true);
        self.write_xref_stream(number, offset, &entries, extra);
        offset
    }

    /// Hybrid section: a stream with the compressed entries, then a classic table
    /// with the rest whose trailer points at the stream through `XRefStm`.
    pub fn hybrid_section(&mut self, stream_number: u32, trailer: &str) -> u64 {
        let compressed: BTreeMap<u32, Entry> = self
            .pending
            .iter()
            .filter(|(_, entry)| matches!(entry, Entry::Compressed(..)))
            .map(|(&number, &entry)| (number, entry))
            .collect();
        for number in compressed.keys() {
            self.pending.remove(number);
        }
        let stream_offset = self.len();
        self.max_number = self.max_number.max(stream_number);
        self.write_xref_stream(stream_number, stream_offset, &compressed, "");
        self.record(stream_number, Entry::Normal(stream_offset, 0));
        self.xref_table(&format!("{trailer} /XRefStm {stream_offset}"))
    }

    fn write_xref_stream(&mut self, number: u32, offset: u64, entries: &BTreeMap<u32, Entry>, extra: &str) {
        debug_assert_eq!(offset, self.len());
        let numbers: Vec<u32> = entries.keys().copied().collect();
        let mut records = Vec::new();
        for entry in entries.values() {
            let (kind, field2, field3) = match *entry {
                Entry::Free(generation) => (0u8, 0u32, generation),
                Entry::Normal(offset, generation) => (1, offset as u32, generation),
                Entry::Compressed(container, index) => (2, container, index as u16),
            };
            records.push(kind);
            records.extend_from_slice(&field2.to_be_bytes());
            records.extend_from_slice(&field3.to_be_bytes());
        }
        let index: Vec<String> = Self::runs(&numbers)
            .into_iter()
            .map(|(first, count)| format!("{first} {count}"))
            .collect();
        let (records, params) = if self.predict_xref_streams {
            (up_filter(&records, RECORD_LEN), format!(" /DecodeParms << /Predictor 12 /Columns {RECORD_LEN} >>"))
        } else {
            (records, String::new())
        };
        let content = deflate(&records);
        self.data.extend_from_slice(
            format!(
                "{number} 0 obj\n<< /Type /XRef /Size {} /W [1 4 2] /Index [{}] /Filter /FlateDecode{params} /Length {} {extra} >>\nstream\n",
                self.max_number + 1,
                index.join(" "),
                content.len()
            )
            .as_bytes(),
        );
        self.data.extend_from_slice(&content);
        self.data.extend_from_slice(b"\nendstream\nendobj\n");
    }

    pub fn startxref(&mut self, offset: u64) -> &mut Self {
        self.data
            .extend_from_slice(format!("startxref\n{offset}\n%%EOF\n").as_bytes());
        self
    }

    /// Replace the first [`PREV_MARKER`] with `offset`, zero padded to the same width.
    pub fn patch_prev(&mut self, offset: u64) {
        let marker = PREV_MARKER.as_bytes();
        let position = self
            .data
            .windows(marker.len())
            .position(|window| window == marker)
            .expect("no marker to patch");
        self.data[position..position + marker.len()].copy_from_slice(format!("{offset:010}").as_bytes());
    }

    pub fn finish(&self) -> Vec<u8> {
        self.data.clone()
    }
}

/// Bytes of one `W [1 4 2]` record.
const RECORD_LEN: usize = 7;

/// Each row prefixed with filter type 2 and stored as the difference to the row above.
fn up_filter(data: &[u8], row_len: usize) -> Vec<u8> {
    let mut filtered = Vec::with_capacity(data.len() + data.len() / row_len);
    let mut previous = vec![0u8; row_len];
    for row in data.chunks(row_len) {
        filtered.push(2);
        filtered.extend(row.iter().zip(&previous).map(|(byte, above)| byte.wrapping_sub(*above)));
        previous.copy_from_slice(row);
    }
    filtered
}

pub fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

#[allow(dead_code)]
pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A small document: catalog, page tree, one page and an info dictionary, with one classic table.
#[allow(dead_code)]
pub fn simple_document() -> (Vec<u8>, u64) {
    let mut pdf = PdfBuilder::new("1.4");
    pdf.object(1, "<< /Type /Catalog /Pages 2 0 R >>");
    pdf.object(2, "<< /Type /Pages /Kids [3 0 R] /Count 1 >>");
    pdf.object(3, "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >>");
    pdf.object(4, "<< /Title (Synthetic) /Producer (pdfstruct tests) >>");
    let xref = pdf.xref_table("/Size 5 /Root 1 0 R /Info 4 0 R");
    pdf.startxref(xref);
    (pdf.finish(), xref)
}

//! Object-literal grammar and the small line grammars the resolver needs.
//!
//! The resolver slices bytes itself (see [`extractor`](crate::extractor)); this module
//! only turns an already bounded slice into a typed [`Object`].

use crate::{Dictionary, Object, ObjectId, StringFormat};
use std::str::{self, FromStr};

use nom::branch::alt;
use nom::bytes::complete::{tag, take, take_while, take_while1, take_while_m_n};
use nom::character::complete::{digit0, digit1, one_of};
use nom::combinator::{map, map_opt, opt, verify};
use nom::error::{ErrorKind, ParseError};
use nom::multi::{fold_many0, many0, many0_count};
use nom::sequence::{delimited, pair, preceded, separated_pair, terminated};
use nom::{AsBytes, AsChar, IResult, Parser};
use nom_locate::LocatedSpan;

/// Maximum allowed embedding of literal strings.
pub const MAX_BRACKET: usize = 100;

/// Maximum embedding of arrays and dictionaries in one object.
pub const MAX_NESTING: usize = 100;

pub(crate) type ParserInput<'a> = LocatedSpan<&'a [u8], &'a str>;
// Change this to something else that implements ParseError to get a
// different error type out of nom.
pub(crate) type NomError<'a> = nom::error::Error<ParserInput<'a>>;

pub(crate) type NomResult<'a, O, E = NomError<'a>> = IResult<ParserInput<'a>, O, E>;

#[inline]
fn strip_nom<O>(r: NomResult<O>) -> Option<O> {
    r.ok().map(|(_, o)| o)
}

#[inline]
fn convert_result<O>(result: Option<O>, input: ParserInput, error_kind: ErrorKind) -> NomResult<O> {
    result.map(|o| (input, o)).ok_or_else(|| {
        let err: NomError = nom::error::Error::from_error_kind(input, error_kind);
        nom::Err::Error(err)
    })
}

#[inline]
fn parse_ascii<T: FromStr>(bytes: &[u8]) -> Option<T> {
    str::from_utf8(bytes).ok().and_then(|s| T::from_str(s).ok())
}

pub(crate) fn eol(input: ParserInput) -> NomResult<ParserInput> {
    alt((tag(&b"\r\n"[..]), tag(&b"\n"[..]), tag(&b"\r"[..]))).parse(input)
}

pub(crate) fn comment(input: ParserInput) -> NomResult<()> {
    map(
        (tag(&b"%"[..]), take_while(|c: u8| !b"\r\n".contains(&c)), eol),
        |_| (),
    )
    .parse(input)
}

#[inline]
pub(crate) fn is_whitespace(c: u8) -> bool {
    b" \t\n\r\0\x0C".contains(&c)
}

#[inline]
pub(crate) fn is_delimiter(c: u8) -> bool {
    b"()<>[]{}/%".contains(&c)
}

#[inline]
fn is_regular(c: u8) -> bool {
    !is_whitespace(c) && !is_delimiter(c)
}

#[inline]
fn is_direct_literal_string(c: u8) -> bool {
    !b"()\\\r\n".contains(&c)
}

fn white_space(input: ParserInput) -> NomResult<()> {
    map(take_while(is_whitespace), |_| ()).parse(input)
}

fn space(input: ParserInput) -> NomResult<()> {
    fold_many0(
        alt((map(take_while1(is_whitespace), |_| ()), comment)),
        || {},
        |_, _| (),
    )
    .parse(input)
}

fn integer(input: ParserInput) -> NomResult<i64> {
    let (i, _) = pair(opt(one_of("+-")), digit1).parse(input)?;

    let int_input = &input[..input.len() - i.len()];
    convert_result(parse_ascii(int_input), i, ErrorKind::Digit)
}

fn real(input: ParserInput) -> NomResult<f64> {
    let (i, _) = pair(
        opt(one_of("+-")),
        alt((
            map((digit1, tag(&b"."[..]), digit0), |_| ()),
            map(pair(tag(&b"."[..]), digit1), |_| ()),
        )),
    )
    .parse(input)?;

    let float_input = &input[..input.len() - i.len()];
    convert_result(parse_ascii(float_input), i, ErrorKind::Digit)
}

fn hex_char(input: ParserInput) -> NomResult<u8> {
    map_opt(
        verify(take(2usize), |h: &ParserInput| {
            h.as_bytes().iter().copied().all(AsChar::is_hex_digit)
        }),
        |x: ParserInput| str::from_utf8(&x).ok().and_then(|s| u8::from_str_radix(s, 16).ok()),
    )
    .parse(input)
}

fn oct_char(input: ParserInput) -> NomResult<u8> {
    map_opt(
        take_while_m_n(1, 3, AsChar::is_oct_digit),
        // Overflow is ignored.
        |x: ParserInput| {
            str::from_utf8(&x)
                .ok()
                .and_then(|s| u16::from_str_radix(s, 8).ok())
                .map(|o| o as u8)
        },
    )
    .parse(input)
}

pub(crate) fn name(input: ParserInput) -> NomResult<Vec<u8>> {
    preceded(
        tag(&b"/"[..]),
        many0(alt((
            preceded(tag(&b"#"[..]), hex_char),
            map_opt(take(1usize), |c: ParserInput| {
                if c[0] != b'#' && is_regular(c[0]) {
                    Some(c[0])
                } else {
                    None
                }
            }),
        ))),
    )
    .parse(input)
}

fn escape_sequence(input: ParserInput) -> NomResult<Option<u8>> {
    preceded(
        tag(&b"\\"[..]),
        alt((
            map(oct_char, Some),
            map(eol, |_| None),
            map(tag(&b"n"[..]), |_| Some(b'\n')),
            map(tag(&b"r"[..]), |_| Some(b'\r')),
            map(tag(&b"t"[..]), |_| Some(b'\t')),
            map(tag(&b"b"[..]), |_| Some(b'\x08')),
            map(tag(&b"f"[..]), |_| Some(b'\x0C')),
            map(take(1usize), |c: ParserInput| Some(c[0])),
        )),
    )
    .parse(input)
}

enum InnerLiteralString<'a> {
    Direct(ParserInput<'a>),
    Escape(Option<u8>),
    Eol(ParserInput<'a>),
    Nested(Vec<u8>),
}

impl InnerLiteralString<'_> {
    fn push(&self, output: &mut Vec<u8>) {
        match self {
            InnerLiteralString::Direct(s) | InnerLiteralString::Eol(s) => output.extend_from_slice(s),
            InnerLiteralString::Escape(e) => output.extend(e),
            InnerLiteralString::Nested(n) => output.extend_from_slice(n),
        }
    }
}

fn inner_literal_string(depth: usize) -> impl Fn(ParserInput) -> NomResult<Vec<u8>> {
    move |input| {
        fold_many0(
            alt((
                map(take_while1(is_direct_literal_string), InnerLiteralString::Direct),
                map(escape_sequence, InnerLiteralString::Escape),
                map(eol, InnerLiteralString::Eol),
                map(nested_literal_string(depth), InnerLiteralString::Nested),
            )),
            Vec::new,
            |mut out: Vec<u8>, value| {
                value.push(&mut out);
                out
            },
        )
        .parse(input)
    }
}

fn nested_literal_string(depth: usize) -> impl Fn(ParserInput) -> NomResult<Vec<u8>> {
    move |input| {
        if depth == 0 {
            map(verify(tag(&b"too deep"[..]), |_| false), |_| vec![]).parse(input)
        } else {
            map(
                delimited(tag(&b"("[..]), inner_literal_string(depth - 1), tag(&b")"[..])),
                |mut content| {
                    content.insert(0, b'(');
                    content.push(b')');
                    content
                },
            )
            .parse(input)
        }
    }
}

fn literal_string(input: ParserInput) -> NomResult<Vec<u8>> {
    delimited(tag(&b"("[..]), inner_literal_string(MAX_BRACKET), tag(&b")"[..])).parse(input)
}

#[inline]
fn hex_digit(input: ParserInput) -> NomResult<u8> {
    map_opt(take(1usize), |c: ParserInput| {
        str::from_utf8(&c).ok().and_then(|c| u8::from_str_radix(c, 16).ok())
    })
    .parse(input)
}

fn hexadecimal_string(input: ParserInput) -> NomResult<Object> {
    map(
        delimited(
            tag(&b"<"[..]),
            terminated(
                fold_many0(
                    preceded(white_space, hex_digit),
                    || -> (Vec<u8>, bool) { (Vec::new(), false) },
                    |state, c| match state {
                        (mut out, false) => {
                            out.push(c << 4);
                            (out, true)
                        }
                        (mut out, true) => {
                            if let Some(last) = out.last_mut() {
                                *last |= c;
                            }
                            (out, false)
                        }
                    },
                ),
                white_space,
            ),
            tag(&b">"[..]),
        ),
        |(bytes, _)| Object::String(bytes, StringFormat::Hexadecimal),
    )
    .parse(input)
}

fn boolean(input: ParserInput) -> NomResult<Object> {
    alt((
        map(tag(&b"true"[..]), |_| Object::Boolean(true)),
        map(tag(&b"false"[..]), |_| Object::Boolean(false)),
    ))
    .parse(input)
}

fn null(input: ParserInput) -> NomResult<Object> {
    map(tag(&b"null"[..]), |_| Object::Null).parse(input)
}

fn array(depth: usize) -> impl Fn(ParserInput) -> NomResult<Vec<Object>> {
    move |input| {
        delimited(pair(tag(&b"["[..]), space), many0(direct_object_at(depth)), tag(&b"]"[..])).parse(input)
    }
}

fn dictionary(depth: usize) -> impl Fn(ParserInput) -> NomResult<Dictionary> {
    move |input| delimited(pair(tag(&b"<<"[..]), space), inner_dictionary(depth), tag(&b">>"[..])).parse(input)
}

fn inner_dictionary(depth: usize) -> impl Fn(ParserInput) -> NomResult<Dictionary> {
    move |input| {
        fold_many0(
            pair(terminated(name, space), direct_object_at(depth)),
            Dictionary::new,
            |mut dict, (key, value)| {
                dict.set(key, value);
                dict
            },
        )
        .parse(input)
    }
}

fn unsigned_int<I: FromStr>(input: ParserInput) -> NomResult<I> {
    map_opt(digit1, |digits: ParserInput| parse_ascii(&digits)).parse(input)
}

fn object_id(input: ParserInput) -> NomResult<ObjectId> {
    pair(terminated(unsigned_int, space), terminated(unsigned_int, space)).parse(input)
}

fn reference(input: ParserInput) -> NomResult<Object> {
    map(terminated(object_id, tag(&b"R"[..])), Object::Reference).parse(input)
}

/// One object; arrays and dictionaries may hold at most `depth` further levels.
fn direct_objects_at(depth: usize) -> impl Fn(ParserInput) -> NomResult<Object> {
    move |input| {
        let fragment = *input.fragment();
        if depth == 0 && (fragment.starts_with(b"[") || fragment.starts_with(b"<<")) {
            let err: NomError = nom::error::Error::from_error_kind(input, ErrorKind::TooLarge);
            return Err(nom::Err::Failure(err));
        }
        let depth = depth.saturating_sub(1);
        alt((
            null,
            boolean,
            reference,
            map(real, Object::Real),
            map(integer, Object::Integer),
            map(name, Object::Name),
            map(literal_string, Object::string_literal),
            hexadecimal_string,
            map(array(depth), Object::Array),
            map(dictionary(depth), Object::Dictionary),
        ))
        .parse(input)
    }
}

fn direct_object_at(depth: usize) -> impl Fn(ParserInput) -> NomResult<Object> {
    move |input| terminated(direct_objects_at(depth), space).parse(input)
}

/// Parse one self-contained object literal: number, name, string, array,
/// dictionary, reference, boolean or null. Leading whitespace and comments are skipped,
/// anything after the literal is ignored.
pub fn direct_object(input: &[u8]) -> Option<Object> {
    strip_nom(preceded(space, direct_object_at(MAX_NESTING)).parse(ParserInput::new_extra(input, "direct object")))
}

/// Decoded name of a `/Name` token, `#xx` escapes resolved.
pub fn name_token(input: &[u8]) -> Option<Vec<u8>> {
    strip_nom(name(ParserInput::new_extra(input, "name")))
}

/// `N G obj` at the start of `input`, after optional whitespace and comments.
/// Returns the id and the number of bytes up to and including the keyword.
pub fn object_header(input: &[u8]) -> Option<(ObjectId, usize)> {
    let span = ParserInput::new_extra(input, "object header");
    let (rest, id) = delimited(space, object_id, tag(&b"obj"[..])).parse(span).ok()?;
    Some((id, input.len() - rest.len()))
}

fn inline_space(input: ParserInput) -> NomResult<ParserInput> {
    take_while1(|c: u8| c == b' ' || c == b'\t').parse(input)
}

fn full_line<'a, O>(
    line: &'a [u8], label: &'static str, mut parser: impl Parser<ParserInput<'a>, Output = O, Error = NomError<'a>>,
) -> Option<O> {
    let (rest, output) = parser.parse(ParserInput::new_extra(line, label)).ok()?;
    if rest.iter().all(|&c| is_whitespace(c)) {
        Some(output)
    } else {
        None
    }
}

/// Subsection header line of a classic cross-reference table: `<first object> <count>`.
pub fn xref_subsection_header(line: &[u8]) -> Option<(u32, u32)> {
    full_line(
        line,
        "xref subsection",
        preceded(white_space, separated_pair(unsigned_int, inline_space, unsigned_int)),
    )
}

/// One classic cross-reference entry: `oooooooooo ggggg n` (or `f`).
/// Returns offset, generation and whether the entry is in use.
pub fn xref_entry(line: &[u8]) -> Option<(u64, u32, bool)> {
    full_line(
        line,
        "xref entry",
        map(
            (
                preceded(white_space, unsigned_int::<u64>),
                preceded(inline_space, unsigned_int::<u32>),
                preceded(inline_space, one_of("nf")),
            ),
            |(offset, generation, kind)| (offset, generation, kind == 'n'),
        ),
    )
}

/// The offset line following `startxref`.
pub fn xref_offset(line: &[u8]) -> Option<u64> {
    full_line(line, "startxref", preceded(white_space, unsigned_int::<u64>))
}

/// `%PDF-x.y` file header; returns the version.
pub fn header(input: &[u8]) -> Option<String> {
    strip_nom(
        map_opt(
            delimited(
                tag(&b"%PDF-"[..]),
                take_while(|c: u8| !b"\r\n".contains(&c)),
                pair(eol, many0_count(comment)),
            ),
            |v: ParserInput| str::from_utf8(&v).ok().map(|v| v.trim_end().to_string()),
        )
        .parse(ParserInput::new_extra(input, "header")),
    )
}

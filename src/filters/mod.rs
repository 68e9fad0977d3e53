//! Stream decoders: Flate and LZW, each followed by the row predictor named in `DecodeParms`.

pub mod png;
pub mod tiff;

use crate::error::DecompressError;
use crate::{Dictionary, Error, Object, Result};
use flate2::{Decompress, FlushDecompress, Status};
use log::warn;

/// Upper bound of the `Colors` decode parameter.
pub const MAX_COLORS: usize = 32;

/// Size of each inflate step.
pub const INFLATE_CHUNK: usize = 2048;

/// Row predictor parameters from a `DecodeParms` dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredictorParams {
    pub predictor: i64,
    pub colors: usize,
    pub bits_per_component: usize,
    pub columns: usize,
}

impl Default for PredictorParams {
    fn default() -> Self {
        PredictorParams {
            predictor: 1,
            colors: 1,
            bits_per_component: 8,
            columns: 1,
        }
    }
}

impl PredictorParams {
    pub fn from_dict(params: Option<&Dictionary>) -> PredictorParams {
        let default = PredictorParams::default();
        let Some(params) = params else {
            return default;
        };
        let int = |key: &[u8], fallback: i64| params.get(key).and_then(Object::as_i64).unwrap_or(fallback);

        PredictorParams {
            predictor: int(b"Predictor", default.predictor),
            colors: (int(b"Colors", 1).max(1) as usize).min(MAX_COLORS),
            bits_per_component: int(b"BitsPerComponent", 8).clamp(1, 16) as usize,
            columns: int(b"Columns", 1).max(1) as usize,
        }
    }

    /// Bytes in one row of samples, without the PNG filter byte. `None` if the
    /// product of `Columns`, `Colors` and `BitsPerComponent` overflows.
    pub fn bytes_per_row(&self) -> Option<usize> {
        let bits = self.columns.checked_mul(self.colors)?.checked_mul(self.bits_per_component)?;
        Some(bits.div_ceil(8))
    }

    /// Bytes of one complete pixel, at least one.
    pub fn bytes_per_pixel(&self) -> usize {
        (self.colors * self.bits_per_component).div_ceil(8)
    }
}

/// Undo one stream filter. `name` is the filter name without its slash.
pub fn decode(name: &[u8], input: &[u8], params: Option<&Dictionary>) -> Result<Vec<u8>> {
    match name {
        b"FlateDecode" | b"Fl" => flate_decode(input, params),
        b"LZWDecode" | b"LZW" => lzw_decode(input, params),
        _ => Err(Error::UnsupportedFilter(String::from_utf8_lossy(name).into_owned())),
    }
}

/// Inflate `input` and reverse the predictor named by `params`.
pub fn flate_decode(input: &[u8], params: Option<&Dictionary>) -> Result<Vec<u8>> {
    let data = inflate(input)?;
    apply_predictor(data, &PredictorParams::from_dict(params))
}

/// Raw inflate of a zlib stream: the two header bytes are skipped and the
/// Adler-32 trailer is never checked.
///
/// A format error after some output has been produced ends the stream early
/// and returns what was decoded so far. With nothing decoded it is fatal.
pub fn inflate(input: &[u8]) -> Result<Vec<u8>> {
    if input.len() <= 2 {
        return Ok(Vec::new());
    }
    let body = &input[2..];
    let mut decoder = Decompress::new(false);
    let mut output = Vec::with_capacity(body.len() * 2);

    loop {
        let consumed = decoder.total_in() as usize;
        let produced = output.len();
        let chunk_end = (consumed + INFLATE_CHUNK).min(body.len());
        output.reserve(INFLATE_CHUNK);

        match decoder.decompress_vec(&body[consumed..chunk_end], &mut output, FlushDecompress::None) {
            Ok(Status::StreamEnd) => return Ok(output),
            Ok(_) => {
                if decoder.total_in() as usize == consumed && output.len() == produced {
                    break;
                }
            }
            Err(err) => {
                if output.is_empty() {
                    return Err(DecompressError::Flate(err.to_string()).into());
                }
                warn!("flate: premature end of stream after {} bytes: {err}", output.len());
                return Ok(output);
            }
        }
    }

    if output.is_empty() {
        return Err(DecompressError::Flate("stream ended before any data".to_string()).into());
    }
    warn!("flate: stream truncated after {} bytes", output.len());
    Ok(output)
}

/// LZW decoding (`EarlyChange` defaults to 1) followed by the predictor.
pub fn lzw_decode(input: &[u8], params: Option<&Dictionary>) -> Result<Vec<u8>> {
    use weezl::{BitOrder, decode::Decoder};
    const MIN_BITS: u8 = 8;

    let early_change = params
        .and_then(|p| p.get(b"EarlyChange").ok())
        .and_then(|p| p.as_i64().ok())
        .map(|v| v != 0)
        .unwrap_or(true);

    let mut decoder = if early_change {
        Decoder::with_tiff_size_switch(BitOrder::Msb, MIN_BITS)
    } else {
        Decoder::new(BitOrder::Msb, MIN_BITS)
    };

    let mut output = Vec::with_capacity(input.len() * 2);
    let result = decoder.into_stream(&mut output).decode_all(input);
    if let Err(err) = result.status {
        if output.is_empty() {
            return Err(DecompressError::Lzw(err.to_string()).into());
        }
        warn!("lzw: premature end of stream after {} bytes: {err}", output.len());
    }

    apply_predictor(output, &PredictorParams::from_dict(params))
}

/// Reverse the row predictor. Predictor 1 (and unknown values below 10) leave the data untouched.
///
/// The row size is checked against the decoded data before any row buffer is allocated.
pub fn apply_predictor(data: Vec<u8>, params: &PredictorParams) -> Result<Vec<u8>> {
    if params.predictor != 2 && params.predictor < 10 {
        return Ok(data);
    }
    let row_len = params.bytes_per_row().ok_or_else(|| {
        DecompressError::Predictor(format!(
            "row of {} columns, {} colors, {} bits overflows",
            params.columns, params.colors, params.bits_per_component
        ))
    })?;

    if params.predictor == 2 {
        Ok(tiff::decode(data, params, row_len))
    } else {
        png::decode_frame(&data, params.bytes_per_pixel(), row_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary;
    use flate2::Compression;
    use flate2::write::ZlibEncoder;
    use std::io::Write;

    fn deflate(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn sample_text() -> Vec<u8> {
        (0..2000u32)
            .map(|i| format!("{} {} Td ({}) Tj\n", i * 7 % 613, i * 13 % 797, i))
            .collect::<String>()
            .into_bytes()
    }

    #[test]
    fn inflate_round_trip() {
        let plain = sample_text();
        let decoded = flate_decode(&deflate(&plain), None).unwrap();
        assert_eq!(decoded, plain);
    }

    #[test]
    fn truncated_stream_returns_partial_output() {
        let plain = sample_text();
        let encoded = deflate(&plain);
        let truncated = &encoded[..encoded.len() * 6 / 10];

        let decoded = inflate(truncated).unwrap();
        assert!(!decoded.is_empty());
        assert!(decoded.len() < plain.len());
        assert_eq!(&plain[..decoded.len()], decoded.as_slice());
    }

    #[test]
    fn failure_without_output_is_fatal() {
        // Block type 3 is reserved: a format error before any byte is produced.
        let err = inflate(b"\x78\x9c\xff\xff\xff\xff").unwrap_err();
        assert!(matches!(err, Error::Decompress(DecompressError::Flate(_))));

        let encoded = deflate(&sample_text());
        let err = inflate(&encoded[..3]).unwrap_err();
        assert!(matches!(err, Error::Decompress(DecompressError::Flate(_))));
    }

    #[test]
    fn png_up_predictor_after_inflate() {
        // Two rows of three 8-bit gray samples, both filtered with "Up".
        let original = [10u8, 20, 30, 15, 25, 40];
        let filtered = [2u8, 10, 20, 30, 2, 5, 5, 10];
        let params = dictionary! {
            "Predictor" => 12,
            "Colors" => 1,
            "BitsPerComponent" => 8,
            "Columns" => 3,
        };
        let decoded = flate_decode(&deflate(&filtered), Some(&params)).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn colors_are_clamped() {
        let params = dictionary! { "Predictor" => 10, "Colors" => 1000, "Columns" => 1 };
        let params = PredictorParams::from_dict(Some(&params));
        assert_eq!(params.colors, MAX_COLORS);
        assert_eq!(params.bytes_per_row(), Some(MAX_COLORS));
    }

    #[test]
    fn oversized_rows_are_rejected() {
        let filtered = deflate(&[0, 1, 2]);

        let params = dictionary! { "Predictor" => 12, "Columns" => 1_i64 << 62, "Colors" => 4 };
        assert_eq!(PredictorParams::from_dict(Some(&params)).bytes_per_row(), None);
        let err = flate_decode(&filtered, Some(&params)).unwrap_err();
        assert!(matches!(err, Error::Decompress(DecompressError::Predictor(_))));
        let params = dictionary! { "Predictor" => 2, "Columns" => 1_i64 << 62, "Colors" => 4 };
        let err = flate_decode(&filtered, Some(&params)).unwrap_err();
        assert!(matches!(err, Error::Decompress(DecompressError::Predictor(_))));

        // No overflow, but one row is far longer than the data.
        let params = dictionary! { "Predictor" => 12, "Columns" => 1_000_000_000 };
        let err = flate_decode(&filtered, Some(&params)).unwrap_err();
        assert!(matches!(err, Error::Decompress(DecompressError::Predictor(_))));
    }

    #[test]
    fn unknown_filter_is_reported() {
        let err = decode(b"JBIG2Decode", b"", None).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFilter(name) if name == "JBIG2Decode"));
    }
}

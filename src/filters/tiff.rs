use super::PredictorParams;

/// Undo TIFF predictor 2: every component is stored as the difference to the
/// same component of the sample on its left, within each row.
///
/// Rows are `row_len` bytes long; a trailing partial row is decoded as far as it goes.
pub fn decode(mut data: Vec<u8>, params: &PredictorParams, row_len: usize) -> Vec<u8> {
    let row_len = row_len.max(1);
    let colors = params.colors;

    match params.bits_per_component {
        8 => {
            for row in data.chunks_mut(row_len) {
                for i in colors..row.len() {
                    row[i] = row[i].wrapping_add(row[i - colors]);
                }
            }
        }
        16 => {
            let stride = colors * 2;
            for row in data.chunks_mut(row_len) {
                let mut i = stride;
                while i + 1 < row.len() {
                    let left = u16::from_be_bytes([row[i - stride], row[i - stride + 1]]);
                    let delta = u16::from_be_bytes([row[i], row[i + 1]]);
                    row[i..i + 2].copy_from_slice(&left.wrapping_add(delta).to_be_bytes());
                    i += 2;
                }
            }
        }
        bits => {
            for row in data.chunks_mut(row_len) {
                decode_packed_row(row, bits, colors);
            }
        }
    }
    data
}

/// Rows whose components are packed several to a byte (1, 2 or 4 bits), or any other width.
fn decode_packed_row(row: &mut [u8], bits: usize, colors: usize) {
    let mask = if bits >= 32 { u32::MAX } else { (1u32 << bits) - 1 };
    let components = row.len() * 8 / bits;
    let mut previous = vec![0u32; colors];

    for index in 0..components {
        let component = index % colors;
        let value = read_bits(row, index * bits, bits);
        let decoded = if index < colors {
            value
        } else {
            value.wrapping_add(previous[component]) & mask
        };
        previous[component] = decoded;
        write_bits(row, index * bits, bits, decoded);
    }
}

fn read_bits(row: &[u8], offset: usize, bits: usize) -> u32 {
    let mut value = 0u32;
    for bit in offset..offset + bits {
        let byte = row[bit / 8];
        value = (value << 1) | u32::from((byte >> (7 - bit % 8)) & 1);
    }
    value
}

fn write_bits(row: &mut [u8], offset: usize, bits: usize, value: u32) {
    for (n, bit) in (offset..offset + bits).enumerate() {
        let set = (value >> (bits - 1 - n)) & 1 == 1;
        let shift = 7 - bit % 8;
        if set {
            row[bit / 8] |= 1 << shift;
        } else {
            row[bit / 8] &= !(1 << shift);
        }
    }
}

//! The `Read` and `Write` traits shared by every piece of the object file
//! format. Unlike the multi-endianness, multi-width traits a format such as
//! ELF needs, the object format here is always little-endian, so there is
//! nothing left to make generic.

use crate::{Input, Result};

/// Parses `Self` from the front of `input`, returning what's left over.
pub trait Read: Sized {
    /// Parse one value, returning the unconsumed remainder of `input`.
    fn read(input: Input<'_>) -> Result<'_, Self>;
}

/// Serializes `self` by appending its bytes to `output`.
pub trait Write {
    /// Append the encoded form of `self` to `output`.
    fn write(&self, output: &mut Vec<u8>);
}

impl Read for u8 {
    fn read(input: Input<'_>) -> Result<'_, Self> {
        nom::number::complete::le_u8(input)
    }
}

impl Write for u8 {
    fn write(&self, output: &mut Vec<u8>) {
        output.push(*self);
    }
}

impl Read for u16 {
    fn read(input: Input<'_>) -> Result<'_, Self> {
        nom::number::complete::le_u16(input)
    }
}

impl Write for u16 {
    fn write(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(&self.to_le_bytes());
    }
}

impl Read for u32 {
    fn read(input: Input<'_>) -> Result<'_, Self> {
        nom::number::complete::le_u32(input)
    }
}

impl Write for u32 {
    fn write(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(&self.to_le_bytes());
    }
}

impl Read for i32 {
    fn read(input: Input<'_>) -> Result<'_, Self> {
        nom::number::complete::le_i32(input)
    }
}

impl Write for i32 {
    fn write(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(&self.to_le_bytes());
    }
}

/// Reads a length-prefixed (`u32`), NUL-terminated-on-write string.
///
/// Grounded in the object format's string encoding (spec §4.9): a `u32`
/// byte count followed by the raw bytes, no NUL terminator on the wire.
pub fn read_string(input: Input<'_>) -> Result<'_, String> {
    let (input, length) = u32::read(input)?;
    let (input, bytes) = nom::bytes::complete::take(length)(input)?;

    let string = String::from_utf8_lossy(bytes).into_owned();

    Ok((input, string))
}

/// Writes a string using the same length-prefixed encoding [`read_string`]
/// reads.
pub fn write_string(value: &str, output: &mut Vec<u8>) {
    let bytes = value.as_bytes();
    (bytes.len() as u32).write(output);
    output.extend_from_slice(bytes);
}

/// Reads a `u32`-prefixed vector of `T`.
pub fn read_vec<'a, T>(input: Input<'a>) -> Result<'a, Vec<T>>
where
    T: Read,
{
    let (mut input, count) = u32::read(input)?;
    let mut items = Vec::with_capacity(count as usize);

    for _ in 0..count {
        let (next_input, item) = T::read(input)?;
        items.push(item);
        input = next_input;
    }

    Ok((input, items))
}

/// Writes a `u32`-prefixed vector of `T`.
pub fn write_vec<T>(items: &[T], output: &mut Vec<u8>)
where
    T: Write,
{
    (items.len() as u32).write(output);

    for item in items {
        item.write(output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u32_round_trips() {
        let mut bytes = Vec::new();
        42u32.write(&mut bytes);
        assert_eq!(u32::read(&bytes), Ok((&[][..], 42)));
    }

    #[test]
    fn string_round_trips() {
        let mut bytes = Vec::new();
        write_string("hello", &mut bytes);
        assert_eq!(read_string(&bytes), Ok((&[][..], "hello".to_owned())));
    }

    #[test]
    fn vec_round_trips() {
        let mut bytes = Vec::new();
        write_vec(&[1u32, 2, 3], &mut bytes);
        assert_eq!(read_vec::<u32>(&bytes), Ok((&[][..], vec![1, 2, 3])));
    }
}

use crate::parsers::{
    dna::{Dna, DnaParseContext},
    BlendParseError, Endianness, PointerSize, Result,
};
use libflate::gzip::Decoder;
use log::debug;
use nom::{
    branch::alt,
    bytes::complete::{tag, take, take_while_m_n},
    combinator::{map, map_res},
    multi::many_till,
    number::complete::{be_i64, be_u32, be_u64, le_i64, le_u32, le_u64},
    sequence::tuple,
    Err,
};
use std::{
    collections::HashMap,
    convert::TryFrom,
    fmt::{self, Debug, Formatter},
    io::Read,
    num::NonZeroU64,
    path::Path,
    result::Result as StdResult,
};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

pub struct BlockData {
    /// The entire binary data of the `Block` in the blend file.
    pub data: Vec<u8>,
    /// The data field can contain more than one struct, count tells us how many there is.
    pub count: usize,
}

impl Debug for BlockData {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "len/count: {}/{}", self.data.len(), self.count)
    }
}

/// Represents all possible block types found in the blend file.
/// `Rend` and `Test` are skipped by this crate but are still represented here.
#[derive(Debug)]
pub enum Block {
    Rend,
    Test,
    Global {
        memory_address: NonZeroU64,
        dna_index: usize,
        data: BlockData,
    },
    /// A principal (or root) block has a two letter code (`OB`, `ME`, `SC`) and its `dna_index` is always valid.
    Principal {
        code: [u8; 2],
        memory_address: NonZeroU64,
        dna_index: usize,
        data: BlockData,
    },
    /// Subsidiary blocks have the code "DATA". Their `dna_index` is only trusted when the field pointing to them
    /// has no useful type (like `void*`).
    Subsidiary {
        memory_address: NonZeroU64,
        dna_index: usize,
        data: BlockData,
    },
    /// The DNA of the blend file. Used to interpret all the other blocks.
    Dna(Dna),
}

impl Block {
    pub fn memory_address(&self) -> Option<NonZeroU64> {
        match self {
            Block::Principal { memory_address, .. }
            | Block::Subsidiary { memory_address, .. }
            | Block::Global { memory_address, .. } => Some(*memory_address),
            _ => None,
        }
    }

    pub fn data(&self) -> Option<&BlockData> {
        match self {
            Block::Principal { data, .. }
            | Block::Subsidiary { data, .. }
            | Block::Global { data, .. } => Some(data),
            _ => None,
        }
    }
}

/// Layout of the block headers that follow the file header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BlockHeaderLayout {
    /// `code, len: u32, address: pointer, dna_index: u32, count: u32`
    Legacy,
    /// `code, dna_index: u32, address: u64, len: i64, count: i64`, used since Blender 5.0.
    Large,
}

#[derive(Debug, Clone)]
pub struct Header {
    /// The size of the pointer on the machine used to save the blend file.
    pub pointer_size: PointerSize,
    /// The endianness on the machine used to save the blend file.
    pub endianness: Endianness,
    /// The version of Blender used to save the blend file, e.g. `*b"280"` or `*b"500"`.
    pub version: [u8; 3],
    pub block_header_layout: BlockHeaderLayout,
}

impl Header {
    /// Returns the version as a number, `280` for 2.80.
    pub fn version_number(&self) -> u32 {
        self.version
            .iter()
            .fold(0, |acc, d| acc * 10 + u32::from(d.wrapping_sub(b'0')))
    }
}

fn pointer_size_bits32(input: &[u8]) -> Result<PointerSize> {
    let (input, _) = tag("_")(input)?;
    Ok((input, PointerSize::Bits32))
}

fn pointer_size_bits64(input: &[u8]) -> Result<PointerSize> {
    let (input, _) = tag("-")(input)?;
    Ok((input, PointerSize::Bits64))
}

pub fn pointer_size(input: &[u8]) -> Result<PointerSize> {
    alt((pointer_size_bits32, pointer_size_bits64))(input)
}

fn endianness_little(input: &[u8]) -> Result<Endianness> {
    let (input, _) = tag("v")(input)?;
    Ok((input, Endianness::Little))
}

fn endianness_big(input: &[u8]) -> Result<Endianness> {
    let (input, _) = tag("V")(input)?;
    Ok((input, Endianness::Big))
}

pub fn endianness(input: &[u8]) -> Result<Endianness> {
    alt((endianness_little, endianness_big))(input)
}

pub fn version(input: &[u8]) -> Result<[u8; 3]> {
    let (input, v) = take(3_usize)(input)?;
    Ok((input, [v[0], v[1], v[2]]))
}

fn digits(len: usize) -> impl Fn(&[u8]) -> Result<u32> {
    move |input: &[u8]| {
        map_res(
            take_while_m_n(len, len, |b: u8| b.is_ascii_digit()),
            |d: &[u8]| String::from_utf8_lossy(d).parse::<u32>(),
        )(input)
    }
}

/// `-` pointer size and `v` endianness are implied by the large header.
fn large_header(input: &[u8]) -> Result<Header> {
    let (input, (header_len, _, format_version, _, version)) =
        tuple((digits(2), tag("-"), digits(2), tag("v"), digits(4)))(input)?;

    if header_len != 17 || format_version != 1 {
        return Err(Err::Failure(BlendParseError::UnsupportedHeader(format!(
            "header size {} with format version {}",
            header_len, format_version
        ))));
    }

    // 0500 -> "500", the same three digits the legacy header uses.
    let version = version % 1000;
    let version = [
        b'0' + (version / 100) as u8,
        b'0' + (version / 10 % 10) as u8,
        b'0' + (version % 10) as u8,
    ];

    Ok((
        input,
        Header {
            pointer_size: PointerSize::Bits64,
            endianness: Endianness::Little,
            version,
            block_header_layout: BlockHeaderLayout::Large,
        },
    ))
}

fn legacy_header(input: &[u8]) -> Result<Header> {
    map(
        tuple((pointer_size, endianness, version)),
        |(pointer_size, endianness, version)| Header {
            pointer_size,
            endianness,
            version,
            block_header_layout: BlockHeaderLayout::Legacy,
        },
    )(input)
}

pub fn header(input: &[u8]) -> Result<Header> {
    let (input, _) = match tag::<_, _, BlendParseError>("BLENDER")(input) {
        Ok(v) => v,
        Err(_) => return Err(Err::Failure(BlendParseError::CompressedFileNotSupported)),
    };

    alt((legacy_header, large_header))(input)
}

pub fn block_header_code(input: &[u8]) -> Result<[u8; 4]> {
    let (input, v) = take(4_usize)(input)?;
    Ok((input, [v[0], v[1], v[2], v[3]]))
}

/// The fields of a block header, independent of its on-disk layout.
struct BlockHeader {
    code: [u8; 4],
    size: usize,
    memory_address: u64,
    dna_index: usize,
    count: usize,
}

fn to_usize<T>(n: T) -> StdResult<usize, Err<BlendParseError>>
where
    usize: TryFrom<T>,
{
    usize::try_from(n).map_err(|_| Err::Failure(BlendParseError::NotEnoughData))
}

#[derive(Debug)]
pub struct RawBlend {
    pub header: Header,
    pub blocks: Vec<Block>,
    pub dna: Dna,
    /// Index into `blocks` for every block with a memory address.
    addresses: HashMap<NonZeroU64, usize>,
}

impl RawBlend {
    /// Parses the .blend file in `data`. Gzip compressed files are inflated first.
    pub fn from_data<T: Read>(mut data: T) -> StdResult<Self, BlendParseError> {
        let mut buffer = Vec::new();
        data.read_to_end(&mut buffer)?;

        if buffer.starts_with(&GZIP_MAGIC) {
            debug!("inflating gzip compressed .blend ({} bytes)", buffer.len());
            let mut decoder = Decoder::new(&buffer[..])?;
            let mut inflated = Vec::new();
            decoder.read_to_end(&mut inflated)?;
            buffer = inflated;
        }

        let res = BlendParseContext::default().blend(&buffer);

        match res {
            Ok((_, blend)) => Ok(blend),
            Err(Err::Failure(e)) | Err(Err::Error(e)) => Err(e),
            Err(Err::Incomplete(..)) => Err(BlendParseError::NotEnoughData),
        }
    }

    /// Parses the .blend file at `path`.
    pub fn from_path<P: AsRef<Path>>(path: P) -> StdResult<Self, BlendParseError> {
        use std::fs::File;

        let file = File::open(path)?;
        RawBlend::from_data(file)
    }

    /// Finds the principal or subsidiary block that was saved from `address`.
    pub fn block_at(&self, address: NonZeroU64) -> Option<&Block> {
        self.addresses
            .get(&address)
            .and_then(|&index| self.blocks.get(index))
    }
}

#[derive(Default)]
pub enum BlendParseContext {
    #[default]
    Empty,
    ParsedHeader(Header),
}

impl BlendParseContext {
    fn u32<'a>(&self, header: &Header, input: &'a [u8]) -> Result<'a, u32> {
        match header.endianness {
            Endianness::Little => le_u32(input),
            Endianness::Big => be_u32(input),
        }
    }

    fn memory_address<'a>(&self, header: &Header, input: &'a [u8]) -> Result<'a, u64> {
        match (header.endianness, header.pointer_size) {
            (Endianness::Little, PointerSize::Bits32) => {
                le_u32(input).map(|(i, n)| (i, u64::from(n)))
            }
            (Endianness::Big, PointerSize::Bits32) => be_u32(input).map(|(i, n)| (i, u64::from(n))),
            (Endianness::Little, PointerSize::Bits64) => le_u64(input),
            (Endianness::Big, PointerSize::Bits64) => be_u64(input),
        }
    }

    fn i64<'a>(&self, header: &Header, input: &'a [u8]) -> Result<'a, i64> {
        match header.endianness {
            Endianness::Little => le_i64(input),
            Endianness::Big => be_i64(input),
        }
    }

    fn block_header<'a>(&self, header: &Header, input: &'a [u8]) -> Result<'a, BlockHeader> {
        let (input, code) = block_header_code(input)?;

        match header.block_header_layout {
            BlockHeaderLayout::Legacy => {
                let (input, size) = self.u32(header, input)?;
                let (input, memory_address) = self.memory_address(header, input)?;
                let (input, dna_index) = self.u32(header, input)?;
                let (input, count) = self.u32(header, input)?;

                Ok((
                    input,
                    BlockHeader {
                        code,
                        size: to_usize(size)?,
                        memory_address,
                        dna_index: to_usize(dna_index)?,
                        count: to_usize(count)?,
                    },
                ))
            }
            BlockHeaderLayout::Large => {
                let (input, dna_index) = self.u32(header, input)?;
                let (input, memory_address) = self.memory_address(header, input)?;
                let (input, size) = self.i64(header, input)?;
                let (input, count) = self.i64(header, input)?;

                Ok((
                    input,
                    BlockHeader {
                        code,
                        size: to_usize(size)?,
                        memory_address,
                        dna_index: to_usize(dna_index)?,
                        count: to_usize(count)?,
                    },
                ))
            }
        }
    }

    fn block<'a>(&self, input: &'a [u8]) -> Result<'a, Block> {
        let header = match self {
            BlendParseContext::ParsedHeader(header) => header,
            BlendParseContext::Empty => unreachable!("Header should be parsed here"),
        };

        let (input, block_header) = self.block_header(header, input)?;
        let (input, block_data) = take(block_header.size)(input)?;

        let BlockHeader {
            code,
            memory_address,
            dna_index,
            count,
            ..
        } = block_header;

        let data = BlockData {
            data: block_data.to_vec(),
            count,
        };
        let address = || {
            NonZeroU64::new(memory_address)
                .ok_or(Err::Failure(BlendParseError::InvalidMemoryAddress))
        };

        let block = match &code {
            b"REND" => Block::Rend,
            b"TEST" => Block::Test,
            b"GLOB" => Block::Global {
                memory_address: address()?,
                dna_index,
                data,
            },
            b"DATA" => Block::Subsidiary {
                memory_address: address()?,
                dna_index,
                data,
            },
            b"DNA1" => {
                let ctx = DnaParseContext::new(header.endianness);
                let (_, dna) = ctx.dna(block_data)?;

                Block::Dna(dna)
            }
            &[code1, code2, 0, 0] => {
                if count != 1 {
                    return Err(Err::Failure(
                        BlendParseError::UnsupportedCountOnPrincipalBlock([code1, code2]),
                    ));
                }

                Block::Principal {
                    code: [code1, code2],
                    memory_address: address()?,
                    dna_index,
                    data,
                }
            }
            _ => return Err(Err::Failure(BlendParseError::UnknownBlockCode(code))),
        };

        Ok((input, block))
    }

    pub fn blend<'a>(&mut self, input: &'a [u8]) -> Result<'a, RawBlend> {
        let (input, header) = header(input)?;

        //This has to happen before the rest of the parser runs
        *self = BlendParseContext::ParsedHeader(header.clone());

        let this = &*self;
        let (input, (blocks, _)) = many_till(|d| this.block(d), tag("ENDB"))(input)?;

        let mut dna = None;
        let mut kept = Vec::with_capacity(blocks.len());
        for block in blocks {
            match block {
                Block::Dna(d) => dna = Some(d),
                other => kept.push(other),
            }
        }

        let dna = match dna {
            Some(dna) => dna,
            None => return Err(Err::Failure(BlendParseError::NoDnaBlockFound)),
        };

        let addresses = kept
            .iter()
            .enumerate()
            .filter_map(|(index, block)| match block {
                Block::Principal { memory_address, .. }
                | Block::Subsidiary { memory_address, .. } => Some((*memory_address, index)),
                _ => None,
            })
            .collect();

        debug!(
            "parsed .blend v{} with {} blocks",
            header.version_number(),
            kept.len()
        );

        Ok((
            input,
            RawBlend {
                header,
                blocks: kept,
                dna,
                addresses,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_legacy_header() {
        let (rest, header) = header(b"BLENDER-v280REND").expect("valid header");
        assert_eq!(rest, b"REND");
        assert_eq!(header.pointer_size, PointerSize::Bits64);
        assert_eq!(header.endianness, Endianness::Little);
        assert_eq!(header.version_number(), 280);
        assert_eq!(header.block_header_layout, BlockHeaderLayout::Legacy);
    }

    #[test]
    fn big_endian_32_bit_header() {
        let (_, header) = header(b"BLENDER_V272").expect("valid header");
        assert_eq!(header.pointer_size, PointerSize::Bits32);
        assert_eq!(header.endianness, Endianness::Big);
    }

    #[test]
    fn parses_large_header() {
        let (rest, header) = header(b"BLENDER17-01v0500").expect("valid header");
        assert!(rest.is_empty());
        assert_eq!(header.version_number(), 500);
        assert_eq!(header.block_header_layout, BlockHeaderLayout::Large);
        assert_eq!(header.pointer_size, PointerSize::Bits64);
    }

    #[test]
    fn unknown_magic_is_reported_as_compressed() {
        // zstd magic
        let data = [0x28, 0xb5, 0x2f, 0xfd, 0, 0, 0, 0];
        match RawBlend::from_data(&data[..]) {
            Err(BlendParseError::CompressedFileNotSupported) => {}
            other => panic!("unexpected result {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn truncated_file_fails() {
        assert!(RawBlend::from_data(&b"BLENDER-v280OB\0\0"[..]).is_err());
    }
}

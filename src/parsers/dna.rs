use crate::parsers::{BlendParseError, Endianness, Result};
use nom::{
    bytes::complete::{tag, take, take_while},
    combinator::map,
    multi::count,
    number::complete::{be_u16, be_u32, le_u16, le_u32},
    sequence::terminated,
    Err,
};

/// The type catalogue stored in the `DNA1` block. Every other block is interpreted through it.
#[derive(Debug)]
pub struct Dna {
    pub names: Vec<String>,
    pub types: Vec<DnaType>,
    pub structs: Vec<DnaStruct>,
}

impl Dna {
    /// Checks that every struct only refers to types and names that exist.
    fn validate(&self) -> std::result::Result<(), BlendParseError> {
        for (i, s) in self.structs.iter().enumerate() {
            if s.type_index >= self.types.len() {
                return Err(BlendParseError::InvalidDna(format!(
                    "struct {} has type index {} of {}",
                    i,
                    s.type_index,
                    self.types.len()
                )));
            }

            for f in &s.fields {
                if f.type_index >= self.types.len() || f.name_index >= self.names.len() {
                    return Err(BlendParseError::InvalidDna(format!(
                        "field of struct {} has type index {} and name index {}",
                        i, f.type_index, f.name_index
                    )));
                }
            }
        }

        Ok(())
    }

    /// Finds the struct definition for a type index, if that type is a struct.
    pub fn struct_for_type(&self, type_index: usize) -> Option<&DnaStruct> {
        self.structs.iter().find(|s| s.type_index == type_index)
    }
}

#[derive(Debug)]
pub struct DnaType {
    pub name: String,
    pub bytes_len: usize, //size in bytes of the type
}

#[derive(Debug)]
pub struct DnaField {
    pub type_index: usize, //index on Dna::types array
    pub name_index: usize, //index on Dna::names array
}

#[derive(Debug)]
pub struct DnaStruct {
    pub type_index: usize, //index on Dna::types array
    pub fields: Vec<DnaField>,
}

/// Every section of the SDNA is padded to 4 bytes.
fn padding(consumed: usize) -> usize {
    (4 - consumed % 4) % 4
}

#[derive(Debug)]
pub struct DnaParseContext {
    endianness: Endianness,
}

impl DnaParseContext {
    pub fn new(endianness: Endianness) -> Self {
        Self { endianness }
    }

    fn u32<'a>(&self, input: &'a [u8]) -> Result<'a, usize> {
        let (input, n) = match self.endianness {
            Endianness::Little => le_u32(input)?,
            Endianness::Big => be_u32(input)?,
        };
        Ok((input, n as usize))
    }

    fn u16<'a>(&self, input: &'a [u8]) -> Result<'a, usize> {
        let (input, n) = match self.endianness {
            Endianness::Little => le_u16(input)?,
            Endianness::Big => be_u16(input)?,
        };
        Ok((input, usize::from(n)))
    }

    /// Fails when `len` elements of at least `min_len` bytes can't fit in what's left, before anything is
    /// allocated for them.
    fn bounded<'a>(&self, input: &'a [u8], len: usize, min_len: usize) -> Result<'a, usize> {
        if len.saturating_mul(min_len) > input.len() {
            return Err(Err::Failure(BlendParseError::NotEnoughData));
        }
        Ok((input, len))
    }

    /// A run of `len` null terminated strings followed by the section padding.
    fn strings<'a>(&self, input: &'a [u8], len: usize) -> Result<'a, Vec<String>> {
        let (input, len) = self.bounded(input, len, 1)?;
        let start_len = input.len();
        let (input, strings) = count(
            terminated(
                map(take_while(|b: u8| b != 0), |b: &[u8]| {
                    String::from_utf8_lossy(b).into_owned()
                }),
                tag("\0"),
            ),
            len,
        )(input)?;

        let (input, _) = take(padding(start_len - input.len()))(input)?;

        Ok((input, strings))
    }

    fn names<'a>(&self, input: &'a [u8]) -> Result<'a, Vec<String>> {
        let (input, _) = tag("NAME")(input)?;
        let (input, names_len) = self.u32(input)?;
        self.strings(input, names_len)
    }

    fn types<'a>(&self, input: &'a [u8]) -> Result<'a, Vec<DnaType>> {
        let (input, _) = tag("TYPE")(input)?;
        let (input, types_len) = self.u32(input)?;
        let (input, type_names) = self.strings(input, types_len)?;

        let (input, _) = tag("TLEN")(input)?;
        let (input, types_len) = self.bounded(input, types_len, 2)?;
        let (input, type_lengths) = count(|i| self.u16(i), types_len)(input)?;
        let (input, _) = take(padding(types_len * 2))(input)?;

        Ok((
            input,
            type_names
                .into_iter()
                .zip(type_lengths)
                .map(|(name, bytes_len)| DnaType { name, bytes_len })
                .collect(),
        ))
    }

    fn field<'a>(&self, input: &'a [u8]) -> Result<'a, DnaField> {
        let (input, type_index) = self.u16(input)?;
        let (input, name_index) = self.u16(input)?;
        Ok((
            input,
            DnaField {
                type_index,
                name_index,
            },
        ))
    }

    fn r#struct<'a>(&self, input: &'a [u8]) -> Result<'a, DnaStruct> {
        let (input, type_index) = self.u16(input)?;
        let (input, fields_len) = self.u16(input)?;
        let (input, fields_len) = self.bounded(input, fields_len, 4)?;
        let (input, fields) = count(|i| self.field(i), fields_len)(input)?;
        Ok((input, DnaStruct { type_index, fields }))
    }

    fn structs<'a>(&self, input: &'a [u8]) -> Result<'a, Vec<DnaStruct>> {
        let (input, _) = tag("STRC")(input)?;
        let (input, structs_len) = self.u32(input)?;
        let (input, structs_len) = self.bounded(input, structs_len, 4)?;
        count(|i| self.r#struct(i), structs_len)(input)
    }

    pub fn dna<'a>(&self, input: &'a [u8]) -> Result<'a, Dna> {
        let (input, _) = tag("SDNA")(input)?;
        let (input, names) = self.names(input)?;
        let (input, types) = self.types(input)?;
        let (input, structs) = self.structs(input)?;

        let dna = Dna {
            names,
            types,
            structs,
        };
        dna.validate().map_err(Err::Failure)?;

        Ok((input, dna))
    }
}

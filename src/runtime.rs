use crate::parsers::{
    blend::{Block, Header, RawBlend},
    dna::{Dna, DnaStruct},
    field::{parse_field, FieldInfo},
    primitive::{is_primitive_type, parse_address, BlendPrimitive},
    BlendParseError,
};
use linked_hash_map::LinkedHashMap;
use log::warn;
use std::{collections::HashSet, io::Read, mem::size_of, num::NonZeroU64, path::Path};
use thiserror::Error;

/// Errors returned when reading the fields of an `Instance`.
#[derive(Debug, Error)]
pub enum AccessError {
    #[error("'{type_name}' has no field '{field}'")]
    UnknownField { type_name: String, field: String },
    #[error("field '{field}' of '{type_name}' is not {expected}")]
    WrongType {
        type_name: String,
        field: String,
        expected: &'static str,
    },
    #[error("field '{field}' is a null pointer")]
    NullPointer { field: String },
    #[error("field '{field}' points to a block that is not in the file")]
    InvalidPointer { field: String },
    #[error("no type information for field '{field}'")]
    MissingType { field: String },
    #[error("field '{field}' reaches past the end of its data")]
    OutOfBounds { field: String },
}

type Result<T> = std::result::Result<T, AccessError>;

/// An `Instance`'s data can be a reference to a `Block` if the `Instance` represents a root or subsidiary block,
/// or it can be raw bytes if the `Instance` was created by accessing a field in another `Instance`.
#[derive(Clone)]
pub enum InstanceDataFormat<'a> {
    Block(&'a Block),
    Raw(&'a [u8]),
}

impl<'a> InstanceDataFormat<'a> {
    /// `get` accesses only a specific slice of the underlying data.
    pub fn get(&self, start: usize, len: usize) -> Option<&'a [u8]> {
        self.data().get(start..start + len)
    }

    pub fn data(&self) -> &'a [u8] {
        match self {
            InstanceDataFormat::Block(block) => block.data().map(|d| &d.data[..]).unwrap_or(&[]),
            InstanceDataFormat::Raw(data) => *data,
        }
    }

    /// Returns the code of the underlying block, if it has one.
    fn code(&self) -> Option<[u8; 2]> {
        match self {
            InstanceDataFormat::Block(Block::Principal { code, .. }) => Some(*code),
            _ => None,
        }
    }

    fn memory_address(&self) -> Option<NonZeroU64> {
        match self {
            InstanceDataFormat::Block(block) => block.memory_address(),
            InstanceDataFormat::Raw(_) => None,
        }
    }
}

/// Represents a field inside a struct. The data `FieldTemplate` keeps is used to interpret the raw bytes of the block.
#[derive(Debug, Clone)]
pub struct FieldTemplate {
    pub info: FieldInfo,
    /// The index of this field's type inside the `Dna::types` array.
    pub type_index: usize,
    pub type_name: String,
    /// Offset of this field inside the struct.
    pub data_start: usize,
    /// The length in bytes of the data owned by this field.
    pub data_len: usize,
    /// A field can represent a primitive or a struct.
    pub is_primitive: bool,
}

/// Represents a struct inside the blend file: an object, a mesh, a scene base, or anything else Blender saves.
/// Data is only interpreted when a field is accessed.
#[derive(Clone)]
pub struct Instance<'a> {
    blend: &'a RawBlend,
    pub type_name: String,
    /// The raw binary data this `Instance` owns.
    pub data: InstanceDataFormat<'a>,
    /// The fields of this `Instance`, in declaration order.
    pub fields: LinkedHashMap<String, FieldTemplate>,
}

impl<'a> std::fmt::Debug for Instance<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("type_name", &self.type_name)
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<'a> Instance<'a> {
    fn new(blend: &'a RawBlend, dna_struct: &DnaStruct, data: InstanceDataFormat<'a>) -> Self {
        let dna = &blend.dna;
        Instance {
            blend,
            type_name: dna
                .types
                .get(dna_struct.type_index)
                .map(|t| t.name.clone())
                .unwrap_or_default(),
            data,
            fields: generate_fields(dna_struct, dna, &blend.header),
        }
    }

    /// Principal blocks have a code: "OB" for objects, "ME" for meshes, "SC" for scenes, etc.
    pub fn code(&self) -> Option<[u8; 2]> {
        self.data.code()
    }

    /// The address the struct had in Blender's memory when the file was saved. Only instances created from a
    /// block have one; pointers to them hold the same value.
    pub fn memory_address(&self) -> Option<NonZeroU64> {
        self.data.memory_address()
    }

    pub fn has_field<T: AsRef<str>>(&self, name: T) -> bool {
        self.fields.contains_key(name.as_ref())
    }

    fn field(&self, name: &str) -> Result<&FieldTemplate> {
        self.fields.get(name).ok_or_else(|| AccessError::UnknownField {
            type_name: self.type_name.clone(),
            field: name.to_owned(),
        })
    }

    fn wrong_type(&self, name: &str, expected: &'static str) -> AccessError {
        AccessError::WrongType {
            type_name: self.type_name.clone(),
            field: name.to_owned(),
            expected,
        }
    }

    fn field_data(&self, name: &str, field: &FieldTemplate) -> Result<&'a [u8]> {
        self.data
            .get(field.data_start, field.data_len)
            .ok_or_else(|| AccessError::OutOfBounds {
                field: name.to_owned(),
            })
    }

    fn pointer_address(&self, name: &str, field: &FieldTemplate) -> Result<Option<NonZeroU64>> {
        let data = self.field_data(name, field)?;
        let header = &self.blend.header;
        let address = parse_address(data, header.pointer_size.bytes_num(), header.endianness)
            .ok_or_else(|| AccessError::OutOfBounds {
                field: name.to_owned(),
            })?;

        Ok(NonZeroU64::new(address))
    }

    /// Follows a single pointer field to the block it points to.
    fn pointed_block(&self, name: &str) -> Result<(&FieldTemplate, &'a Block)> {
        let field = self.field(name)?;

        match field.info {
            FieldInfo::Pointer { .. } => {}
            _ => return Err(self.wrong_type(name, "a pointer")),
        }

        let address = self
            .pointer_address(name, field)?
            .ok_or_else(|| AccessError::NullPointer {
                field: name.to_owned(),
            })?;

        let block = self
            .blend
            .block_at(address)
            .ok_or_else(|| AccessError::InvalidPointer {
                field: name.to_owned(),
            })?;

        Ok((field, block))
    }

    /// Tests whether a field exists and, for pointers, whether it points to a block in the file.
    pub fn is_valid<T: AsRef<str>>(&self, name: T) -> bool {
        let name = name.as_ref();

        match self.field(name) {
            Ok(field) => match field.info {
                FieldInfo::Pointer { .. } => self.pointed_block(name).is_ok(),
                FieldInfo::FnPointer => false,
                _ => true,
            },
            Err(_) => false,
        }
    }

    fn get_value<U: BlendPrimitive>(&self, name: &str) -> Result<U> {
        let field = self.field(name)?;

        match field.info {
            FieldInfo::Value
                if field.is_primitive && reads_as::<U>(&field.type_name) =>
            {
                U::parse(self.field_data(name, field)?, self.blend.header.endianness).ok_or_else(
                    || AccessError::OutOfBounds {
                        field: name.to_owned(),
                    },
                )
            }
            _ => Err(self.wrong_type(name, U::blender_names()[0])),
        }
    }

    pub fn get_i16<T: AsRef<str>>(&self, name: T) -> Result<i16> {
        self.get_value(name.as_ref())
    }

    pub fn get_i32<T: AsRef<str>>(&self, name: T) -> Result<i32> {
        self.get_value(name.as_ref())
    }

    pub fn get_f32<T: AsRef<str>>(&self, name: T) -> Result<f32> {
        self.get_value(name.as_ref())
    }

    /// Reads a primitive array. The field can be an inline array (`co[3]`) or a pointer to a block, in which case
    /// the entire block is read.
    fn get_value_vec<U: BlendPrimitive>(&self, name: &str) -> Result<Vec<U>> {
        let field = self.field(name)?;
        let size = size_of::<U>();

        let data = match field.info {
            FieldInfo::ValueArray { .. }
                if field.is_primitive && reads_as::<U>(&field.type_name) =>
            {
                self.field_data(name, field)?
            }
            FieldInfo::Pointer {
                indirection_count: 1,
            } => {
                let (_, block) = self.pointed_block(name)?;
                block.data().map(|d| &d.data[..]).unwrap_or(&[])
            }
            _ => return Err(self.wrong_type(name, "a primitive array")),
        };

        data.chunks_exact(size)
            .map(|s| {
                U::parse(s, self.blend.header.endianness).ok_or_else(|| AccessError::OutOfBounds {
                    field: name.to_owned(),
                })
            })
            .collect()
    }

    pub fn get_f32_vec<T: AsRef<str>>(&self, name: T) -> Result<Vec<f32>> {
        self.get_value_vec(name.as_ref())
    }

    /// Reads a null terminated `char` array.
    pub fn get_string<T: AsRef<str>>(&self, name: T) -> Result<String> {
        let name = name.as_ref();
        let field = self.field(name)?;

        match field.info {
            FieldInfo::Value | FieldInfo::ValueArray { .. }
                if field.is_primitive && field.type_name == "char" =>
            {
                let data = self.field_data(name, field)?;
                let end = data.iter().position(|c| *c == 0).unwrap_or(data.len());
                Ok(String::from_utf8_lossy(&data[..end]).into_owned())
            }
            _ => Err(self.wrong_type(name, "a string")),
        }
    }

    /// Accesses a struct field, either stored inline or behind a pointer.
    pub fn get<T: AsRef<str>>(&self, name: T) -> Result<Instance<'a>> {
        let name = name.as_ref();
        let field = self.field(name)?;

        match field.info {
            FieldInfo::Value if !field.is_primitive => {
                let dna_struct = self
                    .blend
                    .dna
                    .struct_for_type(field.type_index)
                    .ok_or_else(|| AccessError::MissingType {
                        field: name.to_owned(),
                    })?;

                Ok(Instance::new(
                    self.blend,
                    dna_struct,
                    InstanceDataFormat::Raw(self.field_data(name, field)?),
                ))
            }
            FieldInfo::Pointer {
                indirection_count: 1,
            } => {
                let (field, block) = self.pointed_block(name)?;
                let dna_struct = pointed_struct(&self.blend.dna, field, block).ok_or_else(|| {
                    AccessError::MissingType {
                        field: name.to_owned(),
                    }
                })?;

                Ok(Instance::new(
                    self.blend,
                    dna_struct,
                    InstanceDataFormat::Block(block),
                ))
            }
            _ => Err(self.wrong_type(name, "a struct")),
        }
    }

    /// Reads a pointer to an array of structs (`MVert *mvert`, `CustomDataLayer *layers`). Each element of the
    /// pointed block becomes one `Instance`.
    pub fn get_iter<T: AsRef<str>>(&self, name: T) -> Result<Vec<Instance<'a>>> {
        let name = name.as_ref();
        let (field, block) = self.pointed_block(name)?;

        match field.info {
            FieldInfo::Pointer {
                indirection_count: 1,
            } => {}
            _ => return Err(self.wrong_type(name, "a pointer to structs")),
        }

        let dna_struct =
            pointed_struct(&self.blend.dna, field, block).ok_or_else(|| AccessError::MissingType {
                field: name.to_owned(),
            })?;
        let element_len = self
            .blend
            .dna
            .types
            .get(dna_struct.type_index)
            .map_or(0, |t| t.bytes_len);
        let data = block.data().map(|d| &d.data[..]).unwrap_or(&[]);

        if element_len == 0 {
            return Ok(Vec::new());
        }

        Ok(data
            .chunks_exact(element_len)
            .map(|chunk| Instance::new(self.blend, dna_struct, InstanceDataFormat::Raw(chunk)))
            .collect())
    }

    /// Walks a `ListBase` field from `first`, following `next` until a null pointer. A list that loops back on
    /// itself stops at the first repeated element.
    pub fn get_list<T: AsRef<str>>(&self, name: T) -> Result<Vec<Instance<'a>>> {
        let name = name.as_ref();
        let field = self.field(name)?;

        if field.type_name != "ListBase" {
            return Err(self.wrong_type(name, "a ListBase"));
        }

        let list = self.get(name)?;
        let mut instances = Vec::new();
        let mut seen = HashSet::new();

        if !list.is_valid("first") {
            return Ok(instances);
        }

        let mut cur = list.get("first")?;
        loop {
            match cur.memory_address() {
                Some(address) if seen.insert(address) => {}
                _ => break,
            }

            let next = if cur.is_valid("next") {
                Some(cur.get("next")?)
            } else {
                None
            };

            instances.push(cur);

            match next {
                Some(next) => cur = next,
                None => break,
            }
        }

        Ok(instances)
    }
}

fn reads_as<U: BlendPrimitive>(type_name: &str) -> bool {
    U::blender_names().iter().any(|name| *name == type_name)
}

/// Decides which struct a pointed block holds. Principal blocks always carry the right type. Subsidiary blocks
/// are typed by the pointer field, unless the field is untyped (`void*`) and then the block header is used.
fn pointed_struct<'d>(dna: &'d Dna, field: &FieldTemplate, block: &Block) -> Option<&'d DnaStruct> {
    match block {
        Block::Principal { dna_index, .. } => dna.structs.get(*dna_index),
        Block::Subsidiary { dna_index, .. } => {
            if field.is_primitive {
                dna.structs.get(*dna_index)
            } else {
                dna.struct_for_type(field.type_index)
                    .or_else(|| dna.structs.get(*dna_index))
            }
        }
        _ => None,
    }
}

fn generate_fields(
    dna_struct: &DnaStruct,
    dna: &Dna,
    header: &Header,
) -> LinkedHashMap<String, FieldTemplate> {
    let mut fields = LinkedHashMap::new();
    let mut data_start = 0;

    for field in &dna_struct.fields {
        let (field_dna_type, field_full_name) =
            match (dna.types.get(field.type_index), dna.names.get(field.name_index)) {
                (Some(t), Some(n)) => (t, n),
                _ => {
                    warn!(
                        "skipping field with type {} and name {} outside the DNA",
                        field.type_index, field.name_index
                    );
                    continue;
                }
            };

        let (field_name, field_info) = match parse_field(field_full_name) {
            Ok((_, parsed)) => parsed,
            Err(e) => {
                warn!("skipping field '{}': {:?}", field_full_name, e);
                continue;
            }
        };

        let field_bytes_len = match field_info {
            FieldInfo::Pointer { .. } | FieldInfo::FnPointer => header.pointer_size.bytes_num(),
            FieldInfo::PointerArray { len, .. } => header.pointer_size.bytes_num() * len,
            FieldInfo::ValueArray { len, .. } => field_dna_type.bytes_len * len,
            FieldInfo::Value => field_dna_type.bytes_len,
        };

        fields.insert(
            String::from(field_name),
            FieldTemplate {
                info: field_info,
                type_index: field.type_index,
                type_name: field_dna_type.name.clone(),
                data_start,
                data_len: field_bytes_len,
                is_primitive: is_primitive_type(&field_dna_type.name),
            },
        );

        data_start += field_bytes_len;
    }

    fields
}

/// A parsed .blend file.
pub struct Blend {
    /// Header, file-blocks and DNA of the .blend file, used at runtime to interpret the blocks.
    pub blend: RawBlend,
}

impl Blend {
    pub fn from_path<T: AsRef<Path>>(path: T) -> std::result::Result<Blend, BlendParseError> {
        Ok(Self {
            blend: RawBlend::from_path(path)?,
        })
    }

    pub fn new<T: Read>(data: T) -> std::result::Result<Blend, BlendParseError> {
        Ok(Self {
            blend: RawBlend::from_data(data)?,
        })
    }

    /// The Blender version that saved the file, `280` for 2.80.
    pub fn version(&self) -> u32 {
        self.blend.header.version_number()
    }

    /// The `FileGlobal` struct of the `GLOB` block, which records the scene and view layer that were active when
    /// the file was saved.
    pub fn global(&self) -> Option<Instance> {
        self.blend.blocks.iter().find_map(|block| match block {
            Block::Global { dna_index, .. } => self
                .blend
                .dna
                .structs
                .get(*dna_index)
                .map(|dna_struct| Instance::new(&self.blend, dna_struct, InstanceDataFormat::Block(block))),
            _ => None,
        })
    }

    /// Root blocks have a code that tells us their type, "OB" for object, "ME" for mesh, "SC" for scene.
    /// Instances are returned in file order.
    pub fn instances_with_code(&self, search_code: [u8; 2]) -> impl Iterator<Item = Instance> {
        self.blend
            .blocks
            .iter()
            .filter_map(move |block| match block {
                Block::Principal {
                    code, dna_index, ..
                } if *code == search_code => self
                    .blend
                    .dna
                    .structs
                    .get(*dna_index)
                    .map(|dna_struct| {
                        Instance::new(&self.blend, dna_struct, InstanceDataFormat::Block(block))
                    }),
                _ => None,
            })
    }
}

use super::Endianness;
use nom::number::complete::{
    be_f32, be_i16, be_i32, be_u32, be_u64, le_f32, le_i16, le_i32, le_u32, le_u64,
};

/// Type names the SDNA uses for primitives. Everything else is a struct.
pub const PRIMITIVE_TYPE_NAMES: &[&str] = &[
    "char", "uchar", "short", "ushort", "int", "long", "ulong", "float", "double", "int64_t",
    "uint64_t", "void", "int8_t", "uint8_t", "int16_t", "uint16_t", "int32_t", "uint32_t",
];

pub fn is_primitive_type(type_name: &str) -> bool {
    PRIMITIVE_TYPE_NAMES.iter().any(|name| *name == type_name)
}

/// A primitive that can be decoded from the raw bytes of a field.
pub(crate) trait BlendPrimitive: Sized {
    fn parse(data: &[u8], endianness: Endianness) -> Option<Self>;
    /// SDNA type names this primitive can be read from.
    fn blender_names() -> &'static [&'static str];
}

macro_rules! blend_primitive {
    ($t:ty, $le:ident, $be:ident, [$($name:literal),+]) => {
        impl BlendPrimitive for $t {
            fn parse(data: &[u8], endianness: Endianness) -> Option<Self> {
                let res = match endianness {
                    Endianness::Little => $le::<()>(data),
                    Endianness::Big => $be::<()>(data),
                };
                res.ok().map(|(_, v)| v)
            }
            fn blender_names() -> &'static [&'static str] {
                &[$($name),+]
            }
        }
    };
}

blend_primitive!(i16, le_i16, be_i16, ["short", "int16_t"]);
blend_primitive!(u32, le_u32, be_u32, ["uint", "uint32_t"]);
blend_primitive!(i32, le_i32, be_i32, ["int", "int32_t"]);
blend_primitive!(f32, le_f32, be_f32, ["float"]);
blend_primitive!(u64, le_u64, be_u64, ["uint64_t"]);

/// Reads a pointer-sized unsigned integer.
pub fn parse_address(data: &[u8], pointer_bytes: usize, endianness: Endianness) -> Option<u64> {
    match pointer_bytes {
        4 => u32::parse(data, endianness).map(u64::from),
        8 => u64::parse(data, endianness),
        _ => None,
    }
}

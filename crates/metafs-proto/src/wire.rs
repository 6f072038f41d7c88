use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("insufficient data: need {need} bytes but only {have} remain")]
    InsufficientData { need: usize, have: usize },
    #[error("invalid enum variant for {enum_name}: {value}")]
    InvalidEnumVariant {
        enum_name: &'static str,
        value: u64,
    },
    #[error("invalid UTF-8 string")]
    InvalidUtf8,
}

pub trait WireSerialize {
    fn wire_serialize(&self, buf: &mut Vec<u8>) -> Result<(), WireError>;
}

pub trait WireDeserialize: Sized {
    fn wire_deserialize(buf: &[u8], offset: &mut usize) -> Result<Self, WireError>;
}

fn read_bytes<'a>(buf: &'a [u8], offset: &mut usize, n: usize) -> Result<&'a [u8], WireError> {
    if buf.len() - *offset < n {
        return Err(WireError::InsufficientData {
            need: n,
            have: buf.len() - *offset,
        });
    }
    let slice = &buf[*offset..*offset + n];
    *offset += n;
    Ok(slice)
}

// ---------------------------------------------------------------------------
// Integer types
// ---------------------------------------------------------------------------

macro_rules! impl_wire_for_int {
    ($ty:ty, $size:expr, $read:ident, $write:ident) => {
        impl WireSerialize for $ty {
            fn wire_serialize(&self, buf: &mut Vec<u8>) -> Result<(), WireError> {
                let mut tmp = [0u8; $size];
                LittleEndian::$write(&mut tmp, *self);
                buf.extend_from_slice(&tmp);
                Ok(())
            }
        }

        impl WireDeserialize for $ty {
            fn wire_deserialize(buf: &[u8], offset: &mut usize) -> Result<Self, WireError> {
                let bytes = read_bytes(buf, offset, $size)?;
                Ok(LittleEndian::$read(bytes))
            }
        }
    };
}

impl_wire_for_int!(u16, 2, read_u16, write_u16);
impl_wire_for_int!(u32, 4, read_u32, write_u32);
impl_wire_for_int!(u64, 8, read_u64, write_u64);
impl_wire_for_int!(i64, 8, read_i64, write_i64);

impl WireSerialize for u8 {
    fn wire_serialize(&self, buf: &mut Vec<u8>) -> Result<(), WireError> {
        buf.push(*self);
        Ok(())
    }
}

impl WireDeserialize for u8 {
    fn wire_deserialize(buf: &[u8], offset: &mut usize) -> Result<Self, WireError> {
        let bytes = read_bytes(buf, offset, 1)?;
        Ok(bytes[0])
    }
}

// ---------------------------------------------------------------------------
// bool
// ---------------------------------------------------------------------------

impl WireSerialize for bool {
    fn wire_serialize(&self, buf: &mut Vec<u8>) -> Result<(), WireError> {
        buf.push(if *self { 1u8 } else { 0u8 });
        Ok(())
    }
}

impl WireDeserialize for bool {
    fn wire_deserialize(buf: &[u8], offset: &mut usize) -> Result<Self, WireError> {
        let v = u8::wire_deserialize(buf, offset)?;
        Ok(v != 0)
    }
}

// ---------------------------------------------------------------------------
// String
// ---------------------------------------------------------------------------

impl WireSerialize for String {
    fn wire_serialize(&self, buf: &mut Vec<u8>) -> Result<(), WireError> {
        let len = self.len() as u32;
        len.wire_serialize(buf)?;
        buf.extend_from_slice(self.as_bytes());
        Ok(())
    }
}

impl WireDeserialize for String {
    fn wire_deserialize(buf: &[u8], offset: &mut usize) -> Result<Self, WireError> {
        let len = u32::wire_deserialize(buf, offset)? as usize;
        let bytes = read_bytes(buf, offset, len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| WireError::InvalidUtf8)
    }
}

// ---------------------------------------------------------------------------
// Vec<T>
// ---------------------------------------------------------------------------

// Vec<u8> goes through this generic impl as u32 count + one byte per element,
// so it produces the same bytes as a raw length-prefixed buffer.

impl<T: WireSerialize> WireSerialize for Vec<T> {
    fn wire_serialize(&self, buf: &mut Vec<u8>) -> Result<(), WireError> {
        let len = self.len() as u32;
        len.wire_serialize(buf)?;
        for item in self {
            item.wire_serialize(buf)?;
        }
        Ok(())
    }
}

impl<T: WireDeserialize> WireDeserialize for Vec<T> {
    fn wire_deserialize(buf: &[u8], offset: &mut usize) -> Result<Self, WireError> {
        let len = u32::wire_deserialize(buf, offset)? as usize;
        let mut result = Vec::with_capacity(len);
        for _ in 0..len {
            result.push(T::wire_deserialize(buf, offset)?);
        }
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Option<T>
// ---------------------------------------------------------------------------

impl<T: WireSerialize> WireSerialize for Option<T> {
    fn wire_serialize(&self, buf: &mut Vec<u8>) -> Result<(), WireError> {
        match self {
            None => 0u8.wire_serialize(buf),
            Some(val) => {
                1u8.wire_serialize(buf)?;
                val.wire_serialize(buf)
            }
        }
    }
}

impl<T: WireDeserialize> WireDeserialize for Option<T> {
    fn wire_deserialize(buf: &[u8], offset: &mut usize) -> Result<Self, WireError> {
        let tag = u8::wire_deserialize(buf, offset)?;
        match tag {
            0 => Ok(None),
            _ => Ok(Some(T::wire_deserialize(buf, offset)?)),
        }
    }
}

// ---------------------------------------------------------------------------
// Struct / enum helper macros
// ---------------------------------------------------------------------------

/// Define a plain struct with field-by-field wire serialization in
/// declaration order.
#[macro_export]
macro_rules! wire_struct {
    ($(#[$meta:meta])* pub struct $name:ident {
        $($(#[$fmeta:meta])* pub $field:ident: $ty:ty,)*
    }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
        pub struct $name {
            $($(#[$fmeta])* pub $field: $ty,)*
        }

        impl $crate::wire::WireSerialize for $name {
            fn wire_serialize(&self, buf: &mut Vec<u8>) -> Result<(), $crate::wire::WireError> {
                $(self.$field.wire_serialize(buf)?;)*
                Ok(())
            }
        }

        impl $crate::wire::WireDeserialize for $name {
            fn wire_deserialize(
                buf: &[u8],
                offset: &mut usize,
            ) -> Result<Self, $crate::wire::WireError> {
                Ok(Self {
                    $($field: $crate::wire::WireDeserialize::wire_deserialize(buf, offset)?,)*
                })
            }
        }
    };
}

/// Wire impls for a `num_enum` fieldless enum with the given repr.
#[macro_export]
macro_rules! impl_wire_for_enum {
    ($name:ident, $repr:ty) => {
        impl $crate::wire::WireSerialize for $name {
            fn wire_serialize(&self, buf: &mut Vec<u8>) -> Result<(), $crate::wire::WireError> {
                <$repr>::from(*self).wire_serialize(buf)
            }
        }

        impl $crate::wire::WireDeserialize for $name {
            fn wire_deserialize(
                buf: &[u8],
                offset: &mut usize,
            ) -> Result<Self, $crate::wire::WireError> {
                let raw = <$repr as $crate::wire::WireDeserialize>::wire_deserialize(buf, offset)?;
                $name::try_from(raw).map_err(|_| $crate::wire::WireError::InvalidEnumVariant {
                    enum_name: stringify!($name),
                    value: raw as u64,
                })
            }
        }
    };
}

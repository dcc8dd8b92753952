//! Binary envelope for interface declarations and requests.
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! string, bytes : u32 length, then the raw bytes (strings are UTF-8)
//! sequence      : u32 count, then the items
//! map           : u32 count, then (string key, value) pairs in key order
//! Schema        : name, type_name, payload
//! Method        : name, sequence<Schema> sources, sequence<Schema> sinks
//! Class         : name, sequence<Method>
//! Module        : sequence<Class>
//! Resource      : u8 tag, then 0 = inline (bytes data, string type_tag)
//!                                1 = file (string path, string format)
//!                                2 = handle (u64 id)
//! MethodRequest : class_name, method_name, map<Resource> sources, map<Resource> sinks
//! ```
//!
//! Decoding re-checks the uniqueness rules of the declarations and rejects
//! trailing bytes.

use crate::domain::model::{Class, Method, MethodRequest, ModuleInterface, Resource, Resources, Schema};
use crate::utils::error::{MeillionenError, Result};
use std::path::PathBuf;

const TAG_INLINE: u8 = 0;
const TAG_FILE: u8 = 1;
const TAG_HANDLE: u8 = 2;

pub trait WireEncode {
    fn encode_into(&self, out: &mut Vec<u8>) -> Result<()>;
}

pub trait WireDecode: Sized {
    fn decode_from(reader: &mut Reader<'_>) -> Result<Self>;
}

pub fn to_bytes<T: WireEncode + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    value.encode_into(&mut out)?;
    Ok(out)
}

pub fn from_bytes<T: WireDecode>(bytes: &[u8]) -> Result<T> {
    let mut reader = Reader::new(bytes);
    let value = T::decode_from(&mut reader)?;
    if reader.remaining() > 0 {
        return Err(wire_error(format!(
            "{} trailing bytes after envelope",
            reader.remaining()
        )));
    }
    Ok(value)
}

fn wire_error(message: impl Into<String>) -> MeillionenError {
    MeillionenError::WireFormat {
        message: message.into(),
    }
}

fn put_len(out: &mut Vec<u8>, len: usize) -> Result<()> {
    let len = u32::try_from(len).map_err(|_| wire_error(format!("length {} exceeds u32", len)))?;
    out.extend_from_slice(&len.to_le_bytes());
    Ok(())
}

fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) -> Result<()> {
    put_len(out, bytes.len())?;
    out.extend_from_slice(bytes);
    Ok(())
}

fn put_str(out: &mut Vec<u8>, value: &str) -> Result<()> {
    put_bytes(out, value.as_bytes())
}

fn put_seq<T: WireEncode>(out: &mut Vec<u8>, items: &[T]) -> Result<()> {
    put_len(out, items.len())?;
    for item in items {
        item.encode_into(out)?;
    }
    Ok(())
}

fn put_resources(out: &mut Vec<u8>, resources: &Resources) -> Result<()> {
    put_len(out, resources.len())?;
    for (name, resource) in resources {
        put_str(out, name)?;
        resource.encode_into(out)?;
    }
    Ok(())
}

/// Cursor over an envelope being decoded.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(wire_error(format!(
                "needed {} bytes at offset {}, {} left",
                n,
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(raw))
    }

    fn u64(&mut self) -> Result<u64> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(raw))
    }

    fn len(&mut self) -> Result<usize> {
        Ok(self.u32()? as usize)
    }

    fn bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.len()?;
        Ok(self.take(len)?.to_vec())
    }

    fn string(&mut self) -> Result<String> {
        let offset = self.pos;
        String::from_utf8(self.bytes()?)
            .map_err(|_| wire_error(format!("invalid UTF-8 in string at offset {}", offset)))
    }

    fn seq<T: WireDecode>(&mut self) -> Result<Vec<T>> {
        let count = self.len()?;
        // Every item takes at least one byte, so a larger count is corrupt.
        if count > self.remaining() {
            return Err(wire_error(format!(
                "sequence of {} items cannot fit in {} bytes",
                count,
                self.remaining()
            )));
        }
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(T::decode_from(self)?);
        }
        Ok(items)
    }

    fn resources(&mut self) -> Result<Resources> {
        let count = self.len()?;
        let mut resources = Resources::new();
        for _ in 0..count {
            let name = self.string()?;
            let resource = Resource::decode_from(self)?;
            if resources.insert(name.clone(), resource).is_some() {
                return Err(wire_error(format!("resource '{}' appears twice", name)));
            }
        }
        Ok(resources)
    }
}

impl WireEncode for Schema {
    fn encode_into(&self, out: &mut Vec<u8>) -> Result<()> {
        put_str(out, &self.name)?;
        put_str(out, &self.type_name)?;
        put_bytes(out, &self.payload)
    }
}

impl WireDecode for Schema {
    fn decode_from(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Schema {
            name: reader.string()?,
            type_name: reader.string()?,
            payload: reader.bytes()?,
        })
    }
}

impl WireEncode for Method {
    fn encode_into(&self, out: &mut Vec<u8>) -> Result<()> {
        put_str(out, self.name())?;
        put_seq(out, self.sources())?;
        put_seq(out, self.sinks())
    }
}

impl WireDecode for Method {
    fn decode_from(reader: &mut Reader<'_>) -> Result<Self> {
        let name = reader.string()?;
        let sources = reader.seq()?;
        let sinks = reader.seq()?;
        Method::new(name, sources, sinks)
    }
}

impl WireEncode for Class {
    fn encode_into(&self, out: &mut Vec<u8>) -> Result<()> {
        put_str(out, self.name())?;
        put_seq(out, self.methods())
    }
}

impl WireDecode for Class {
    fn decode_from(reader: &mut Reader<'_>) -> Result<Self> {
        let name = reader.string()?;
        let methods = reader.seq()?;
        Class::new(name, methods)
    }
}

impl WireEncode for ModuleInterface {
    fn encode_into(&self, out: &mut Vec<u8>) -> Result<()> {
        put_seq(out, self.classes())
    }
}

impl WireDecode for ModuleInterface {
    fn decode_from(reader: &mut Reader<'_>) -> Result<Self> {
        ModuleInterface::new(reader.seq()?)
    }
}

impl WireEncode for Resource {
    fn encode_into(&self, out: &mut Vec<u8>) -> Result<()> {
        match self {
            Resource::Inline { data, type_tag } => {
                out.push(TAG_INLINE);
                put_bytes(out, data)?;
                put_str(out, type_tag)
            }
            Resource::File { path, format } => {
                let path = path.to_str().ok_or_else(|| {
                    wire_error(format!("path {} is not valid UTF-8", path.display()))
                })?;
                out.push(TAG_FILE);
                put_str(out, path)?;
                put_str(out, format)
            }
            Resource::Handle { id } => {
                out.push(TAG_HANDLE);
                out.extend_from_slice(&id.to_le_bytes());
                Ok(())
            }
        }
    }
}

impl WireDecode for Resource {
    fn decode_from(reader: &mut Reader<'_>) -> Result<Self> {
        match reader.u8()? {
            TAG_INLINE => Ok(Resource::Inline {
                data: reader.bytes()?,
                type_tag: reader.string()?,
            }),
            TAG_FILE => Ok(Resource::File {
                path: PathBuf::from(reader.string()?),
                format: reader.string()?,
            }),
            TAG_HANDLE => Ok(Resource::Handle { id: reader.u64()? }),
            other => Err(wire_error(format!("unknown resource tag {}", other))),
        }
    }
}

impl WireEncode for MethodRequest {
    fn encode_into(&self, out: &mut Vec<u8>) -> Result<()> {
        put_str(out, &self.class_name)?;
        put_str(out, &self.method_name)?;
        put_resources(out, &self.sources)?;
        put_resources(out, &self.sinks)
    }
}

impl WireDecode for MethodRequest {
    fn decode_from(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(MethodRequest {
            class_name: reader.string()?,
            method_name: reader.string()?,
            sources: reader.resources()?,
            sinks: reader.resources()?,
        })
    }
}

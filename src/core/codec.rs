//! Built-in attribute codecs
//!
//! One codec per [`AttrType`]. List values linearize as comma separated
//! text, which is also the form an ACL side-file holds.

use crate::attribute::{
    AttrFlags, AttrType, AttrValue, Attribute, AttributeCodec, EncodeReason, SetMode,
};
use crate::entry::AttrEntry;
use crate::error::{Result, StateError};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Codec for the given attribute type
pub fn for_type(kind: AttrType) -> Arc<dyn AttributeCodec> {
    match kind {
        AttrType::Long => long(),
        AttrType::Boolean => boolean(),
        AttrType::String => string(),
        AttrType::ArrayOfStrings => string_array(),
        AttrType::Resource => resource(),
        AttrType::Acl => acl(),
    }
}

pub fn long() -> Arc<dyn AttributeCodec> {
    Arc::new(LongCodec)
}

pub fn boolean() -> Arc<dyn AttributeCodec> {
    Arc::new(BooleanCodec)
}

pub fn string() -> Arc<dyn AttributeCodec> {
    Arc::new(StringCodec)
}

pub fn string_array() -> Arc<dyn AttributeCodec> {
    Arc::new(StringArrayCodec)
}

pub fn resource() -> Arc<dyn AttributeCodec> {
    Arc::new(ResourceCodec)
}

pub fn acl() -> Arc<dyn AttributeCodec> {
    Arc::new(AclCodec)
}

/// Entry flags recorded for a saved attribute
fn saved_flags(attr: &Attribute) -> AttrFlags {
    let mut flags = attr.flags();
    flags.remove(AttrFlags::MODIFIED);
    flags
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Union for Incr, difference for Decr
fn merge_list(target: &[String], source: &[String], mode: SetMode) -> Vec<String> {
    match mode {
        SetMode::Set => source.to_vec(),
        SetMode::Incr => {
            let mut merged = target.to_vec();
            for item in source {
                if !merged.contains(item) {
                    merged.push(item.clone());
                }
            }
            merged
        }
        SetMode::Decr => target
            .iter()
            .filter(|item| !source.contains(item))
            .cloned()
            .collect(),
    }
}

fn type_mismatch(name: &str, value: &AttrValue) -> StateError {
    StateError::encode(name, format!("unexpected value {:?}", value))
}

/// Single-entry encode shared by the scalar and list codecs
fn encode_one(
    attr: &Attribute,
    name: &str,
    out: &mut Vec<AttrEntry>,
    text: Option<String>,
) -> Result<usize> {
    if !attr.is_set() {
        return Ok(0);
    }
    let text = text.ok_or_else(|| type_mismatch(name, attr.value()))?;
    out.push(AttrEntry::new(name, None, text, saved_flags(attr)));
    Ok(1)
}

/// Merges need a source value
fn check_source(source: &Attribute) -> Result<()> {
    if source.is_set() {
        Ok(())
    } else {
        Err(StateError::decode("<set>", "source attribute has no value"))
    }
}

pub struct LongCodec;

impl AttributeCodec for LongCodec {
    fn kind(&self) -> AttrType {
        AttrType::Long
    }

    fn encode(
        &self,
        attr: &Attribute,
        name: &str,
        _reason: EncodeReason,
        out: &mut Vec<AttrEntry>,
    ) -> Result<usize> {
        let text = match attr.value() {
            AttrValue::Long(n) => Some(n.to_string()),
            _ => None,
        };
        encode_one(attr, name, out, text)
    }

    fn decode(
        &self,
        attr: &mut Attribute,
        name: &str,
        _resource: Option<&str>,
        value: &str,
    ) -> Result<()> {
        if value.trim().is_empty() {
            attr.reset();
            return Ok(());
        }
        let n = value
            .trim()
            .parse::<i64>()
            .map_err(|e| StateError::decode(name, format!("{:?}: {}", value, e)))?;
        attr.install(AttrValue::Long(n));
        Ok(())
    }

    fn set(&self, target: &mut Attribute, source: &Attribute, mode: SetMode) -> Result<()> {
        check_source(source)?;
        let src = match source.value() {
            AttrValue::Long(n) => *n,
            other => return Err(type_mismatch("<set>", other)),
        };
        let current = match target.value() {
            AttrValue::Long(n) => *n,
            _ => 0,
        };
        let next = match mode {
            SetMode::Set => src,
            SetMode::Incr => current.saturating_add(src),
            SetMode::Decr => current.saturating_sub(src),
        };
        target.install(AttrValue::Long(next));
        Ok(())
    }
}

pub struct BooleanCodec;

impl AttributeCodec for BooleanCodec {
    fn kind(&self) -> AttrType {
        AttrType::Boolean
    }

    fn encode(
        &self,
        attr: &Attribute,
        name: &str,
        _reason: EncodeReason,
        out: &mut Vec<AttrEntry>,
    ) -> Result<usize> {
        let text = match attr.value() {
            AttrValue::Boolean(true) => Some("True".to_string()),
            AttrValue::Boolean(false) => Some("False".to_string()),
            _ => None,
        };
        encode_one(attr, name, out, text)
    }

    fn decode(
        &self,
        attr: &mut Attribute,
        name: &str,
        _resource: Option<&str>,
        value: &str,
    ) -> Result<()> {
        let flag = match value.trim().to_ascii_lowercase().as_str() {
            "" => {
                attr.reset();
                return Ok(());
            }
            "true" | "t" | "y" | "yes" | "1" => true,
            "false" | "f" | "n" | "no" | "0" => false,
            _ => return Err(StateError::decode(name, format!("not a boolean: {:?}", value))),
        };
        attr.install(AttrValue::Boolean(flag));
        Ok(())
    }

    fn set(&self, target: &mut Attribute, source: &Attribute, mode: SetMode) -> Result<()> {
        check_source(source)?;
        let src = match source.value() {
            AttrValue::Boolean(b) => *b,
            other => return Err(type_mismatch("<set>", other)),
        };
        let current = matches!(target.value(), AttrValue::Boolean(true));
        let next = match mode {
            SetMode::Set => src,
            SetMode::Incr => current || src,
            SetMode::Decr => current && !src,
        };
        target.install(AttrValue::Boolean(next));
        Ok(())
    }
}

pub struct StringCodec;

impl AttributeCodec for StringCodec {
    fn kind(&self) -> AttrType {
        AttrType::String
    }

    fn encode(
        &self,
        attr: &Attribute,
        name: &str,
        _reason: EncodeReason,
        out: &mut Vec<AttrEntry>,
    ) -> Result<usize> {
        let text = match attr.value() {
            AttrValue::String(s) => Some(s.clone()),
            _ => None,
        };
        encode_one(attr, name, out, text)
    }

    fn decode(
        &self,
        attr: &mut Attribute,
        _name: &str,
        _resource: Option<&str>,
        value: &str,
    ) -> Result<()> {
        if value.is_empty() {
            attr.reset();
        } else {
            attr.install(AttrValue::String(value.to_string()));
        }
        Ok(())
    }

    fn set(&self, target: &mut Attribute, source: &Attribute, mode: SetMode) -> Result<()> {
        check_source(source)?;
        let AttrValue::String(src) = source.value() else {
            return Err(type_mismatch("<set>", source.value()));
        };
        let next = match (mode, target.value()) {
            (SetMode::Set, _) => src.clone(),
            (SetMode::Incr, AttrValue::String(cur)) => format!("{}{}", cur, src),
            (SetMode::Incr, _) => src.clone(),
            (SetMode::Decr, AttrValue::String(cur)) => {
                cur.strip_suffix(src.as_str()).unwrap_or(cur).to_string()
            }
            (SetMode::Decr, _) => String::new(),
        };
        if next.is_empty() {
            target.reset();
        } else {
            target.install(AttrValue::String(next));
        }
        Ok(())
    }
}

pub struct StringArrayCodec;

impl AttributeCodec for StringArrayCodec {
    fn kind(&self) -> AttrType {
        AttrType::ArrayOfStrings
    }

    fn encode(
        &self,
        attr: &Attribute,
        name: &str,
        _reason: EncodeReason,
        out: &mut Vec<AttrEntry>,
    ) -> Result<usize> {
        let text = match attr.value() {
            AttrValue::Strings(items) => Some(items.join(",")),
            _ => None,
        };
        encode_one(attr, name, out, text)
    }

    fn decode(
        &self,
        attr: &mut Attribute,
        _name: &str,
        _resource: Option<&str>,
        value: &str,
    ) -> Result<()> {
        let items = split_list(value);
        if items.is_empty() {
            attr.reset();
        } else {
            attr.install(AttrValue::Strings(items));
        }
        Ok(())
    }

    fn set(&self, target: &mut Attribute, source: &Attribute, mode: SetMode) -> Result<()> {
        check_source(source)?;
        let AttrValue::Strings(src) = source.value() else {
            return Err(type_mismatch("<set>", source.value()));
        };
        let current = match target.value() {
            AttrValue::Strings(items) => items.clone(),
            _ => Vec::new(),
        };
        let merged = merge_list(&current, src, mode);
        if merged.is_empty() {
            self.free(target);
            target.mark_modified();
        } else {
            target.install(AttrValue::Strings(merged));
        }
        Ok(())
    }
}

/// Resource lists encode one entry per resource
pub struct ResourceCodec;

impl AttributeCodec for ResourceCodec {
    fn kind(&self) -> AttrType {
        AttrType::Resource
    }

    fn encode(
        &self,
        attr: &Attribute,
        name: &str,
        _reason: EncodeReason,
        out: &mut Vec<AttrEntry>,
    ) -> Result<usize> {
        if !attr.is_set() {
            return Ok(0);
        }
        let AttrValue::Resources(map) = attr.value() else {
            return Err(type_mismatch(name, attr.value()));
        };
        let flags = saved_flags(attr);
        for (resource, value) in map {
            out.push(AttrEntry::new(name, Some(resource), value.clone(), flags));
        }
        Ok(map.len())
    }

    fn decode(
        &self,
        attr: &mut Attribute,
        name: &str,
        resource: Option<&str>,
        value: &str,
    ) -> Result<()> {
        let resource = resource
            .filter(|r| !r.is_empty())
            .ok_or_else(|| StateError::decode(name, "resource entry without a resource name"))?;
        let mut map = match attr.value() {
            AttrValue::Resources(map) if attr.is_set() => map.clone(),
            _ => BTreeMap::new(),
        };
        map.insert(resource.to_string(), value.to_string());
        attr.install(AttrValue::Resources(map));
        Ok(())
    }

    fn set(&self, target: &mut Attribute, source: &Attribute, mode: SetMode) -> Result<()> {
        check_source(source)?;
        let AttrValue::Resources(src) = source.value() else {
            return Err(type_mismatch("<set>", source.value()));
        };
        let mut map = match target.value() {
            AttrValue::Resources(map) => map.clone(),
            _ => BTreeMap::new(),
        };
        match mode {
            SetMode::Set | SetMode::Incr => {
                map.extend(src.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            SetMode::Decr => map.retain(|k, _| !src.contains_key(k)),
        }
        if map.is_empty() {
            self.free(target);
            target.mark_modified();
        } else {
            target.install(AttrValue::Resources(map));
        }
        Ok(())
    }
}

/// Access control lists: ordered entries such as `alice@host` or `+bob`
pub struct AclCodec;

impl AttributeCodec for AclCodec {
    fn kind(&self) -> AttrType {
        AttrType::Acl
    }

    fn encode(
        &self,
        attr: &Attribute,
        name: &str,
        _reason: EncodeReason,
        out: &mut Vec<AttrEntry>,
    ) -> Result<usize> {
        let text = match attr.value() {
            AttrValue::Acl(entries) => Some(entries.join(",")),
            _ => None,
        };
        encode_one(attr, name, out, text)
    }

    fn decode(
        &self,
        attr: &mut Attribute,
        _name: &str,
        _resource: Option<&str>,
        value: &str,
    ) -> Result<()> {
        let entries = split_list(value);
        if entries.is_empty() {
            attr.reset();
        } else {
            attr.install(AttrValue::Acl(entries));
        }
        Ok(())
    }

    fn set(&self, target: &mut Attribute, source: &Attribute, mode: SetMode) -> Result<()> {
        check_source(source)?;
        let AttrValue::Acl(src) = source.value() else {
            return Err(type_mismatch("<set>", source.value()));
        };
        let current = match target.value() {
            AttrValue::Acl(entries) => entries.clone(),
            _ => Vec::new(),
        };
        let merged = merge_list(&current, src, mode);
        if merged.is_empty() {
            self.free(target);
            target.mark_modified();
        } else {
            target.install(AttrValue::Acl(merged));
        }
        Ok(())
    }
}

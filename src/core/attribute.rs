//! Attribute model
//!
//! A state object owns a fixed array of [`Attribute`] slots laid out by an
//! immutable [`Schema`]. Each slot's [`AttributeDef`] names the slot and
//! carries the [`AttributeCodec`] that knows how to linearize, parse and
//! merge values of that type.

use crate::entry::AttrEntry;
use crate::error::{Result, StateError};
use crate::validation::AttributeName;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Attribute value flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct AttrFlags(u16);

impl AttrFlags {
    /// The attribute has a value
    pub const SET: AttrFlags = AttrFlags(0x0001);
    /// The value changed since the last save
    pub const MODIFIED: AttrFlags = AttrFlags(0x0002);
    /// The value is the schema default, not an explicit setting
    pub const DEFAULT: AttrFlags = AttrFlags(0x0004);

    pub const fn empty() -> Self {
        AttrFlags(0)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Build flags from stored bits, dropping unknown ones
    pub const fn from_bits_truncate(bits: u16) -> Self {
        AttrFlags(bits & 0x0007)
    }

    pub const fn contains(self, other: AttrFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: AttrFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: AttrFlags) {
        self.0 &= !other.0;
    }
}

impl std::ops::BitOr for AttrFlags {
    type Output = AttrFlags;

    fn bitor(self, rhs: AttrFlags) -> AttrFlags {
        AttrFlags(self.0 | rhs.0)
    }
}

/// Attribute value type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttrType {
    Long,
    Boolean,
    String,
    ArrayOfStrings,
    /// Named resource values, one entry per resource
    Resource,
    /// Access control list, persisted in its own side-file
    Acl,
}

/// Attribute value
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AttrValue {
    #[default]
    None,
    Long(i64),
    Boolean(bool),
    String(String),
    Strings(Vec<String>),
    Resources(BTreeMap<String, String>),
    Acl(Vec<String>),
}

impl AttrValue {
    /// Whether the value can be held by an attribute of `kind`
    pub fn fits(&self, kind: AttrType) -> bool {
        matches!(
            (self, kind),
            (AttrValue::None, _)
                | (AttrValue::Long(_), AttrType::Long)
                | (AttrValue::Boolean(_), AttrType::Boolean)
                | (AttrValue::String(_), AttrType::String)
                | (AttrValue::Strings(_), AttrType::ArrayOfStrings)
                | (AttrValue::Resources(_), AttrType::Resource)
                | (AttrValue::Acl(_), AttrType::Acl)
        )
    }

    /// Check that the value comes back unchanged from a save and recovery
    ///
    /// Empty strings, lists and resource maps recover as unset. List items
    /// are stored as comma separated text, so an item must be non-empty,
    /// free of commas and NULs, and carry no surrounding whitespace.
    pub fn check_storable(&self) -> std::result::Result<(), String> {
        match self {
            AttrValue::None => Err("no value; unset the attribute instead".to_string()),
            AttrValue::Long(_) | AttrValue::Boolean(_) => Ok(()),
            AttrValue::String(s) if s.is_empty() => Err("empty string".to_string()),
            AttrValue::String(_) => Ok(()),
            AttrValue::Strings(items) | AttrValue::Acl(items) => {
                if items.is_empty() {
                    return Err("empty list".to_string());
                }
                items.iter().try_for_each(|item| check_list_item(item))
            }
            AttrValue::Resources(map) => {
                if map.is_empty() {
                    return Err("empty resource list".to_string());
                }
                if map.contains_key("") {
                    return Err("resource without a name".to_string());
                }
                Ok(())
            }
        }
    }
}

fn check_list_item(item: &str) -> std::result::Result<(), String> {
    if item.is_empty() {
        Err("empty list item".to_string())
    } else if item.contains([',', '\0']) {
        Err(format!("list item {:?} contains a separator", item))
    } else if item.trim() != item {
        Err(format!("list item {:?} has surrounding whitespace", item))
    } else {
        Ok(())
    }
}

/// How `AttributeCodec::set` combines source into target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetMode {
    /// Replace the target value
    Set,
    /// Add to the target (sum, append, union)
    Incr,
    /// Remove from the target (subtract, delete members)
    Decr,
}

/// Why an attribute is being encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeReason {
    /// Writing to durable storage
    Save,
    /// Reporting to a client
    Status,
}

/// Why a post-set action runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionReason {
    New,
    Alter,
    /// Value was just recovered from disk
    Recover,
}

/// Hook run after an attribute value is installed
///
/// Receives the attribute, the owning object's name and the reason.
pub type PostSetAction = fn(&mut Attribute, &str, ActionReason) -> Result<()>;

/// One attribute slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    kind: AttrType,
    value: AttrValue,
    flags: AttrFlags,
}

impl Attribute {
    /// An unset attribute of the given type
    pub fn cleared(kind: AttrType) -> Self {
        Attribute {
            kind,
            value: AttrValue::None,
            flags: AttrFlags::empty(),
        }
    }

    pub fn kind(&self) -> AttrType {
        self.kind
    }

    pub fn value(&self) -> &AttrValue {
        &self.value
    }

    pub fn flags(&self) -> AttrFlags {
        self.flags
    }

    pub fn is_set(&self) -> bool {
        self.flags.contains(AttrFlags::SET)
    }

    pub fn is_modified(&self) -> bool {
        self.flags.contains(AttrFlags::MODIFIED)
    }

    pub fn is_default(&self) -> bool {
        self.flags.contains(AttrFlags::DEFAULT)
    }

    pub fn mark_modified(&mut self) {
        self.flags.insert(AttrFlags::MODIFIED);
    }

    pub fn clear_modified(&mut self) {
        self.flags.remove(AttrFlags::MODIFIED);
    }

    /// Install an explicit value: SET and MODIFIED, no longer default
    ///
    /// Codecs use this after decoding or merging a value.
    pub fn install(&mut self, value: AttrValue) {
        self.value = value;
        self.flags.insert(AttrFlags::SET | AttrFlags::MODIFIED);
        self.flags.remove(AttrFlags::DEFAULT);
    }

    /// Drop the value; the change itself counts as a modification
    pub fn reset(&mut self) {
        self.value = AttrValue::None;
        self.flags.remove(AttrFlags::SET | AttrFlags::DEFAULT);
        self.flags.insert(AttrFlags::MODIFIED);
    }

    pub(crate) fn install_default(&mut self, value: AttrValue) {
        self.value = value;
        self.flags = AttrFlags::SET | AttrFlags::DEFAULT;
    }
}

/// Per-type attribute operations
///
/// Implementations turn an attribute into linear entries for the state
/// file and back. Values must not change while `encode` runs; callers
/// serialize access to a state object.
pub trait AttributeCodec: Send + Sync {
    /// The attribute type this codec handles
    fn kind(&self) -> AttrType;

    /// Append the attribute's linear form to `out`, returning the entry count
    ///
    /// An unset attribute encodes to zero entries.
    fn encode(
        &self,
        attr: &Attribute,
        name: &str,
        reason: EncodeReason,
        out: &mut Vec<AttrEntry>,
    ) -> Result<usize>;

    /// Parse one entry's value into `attr`
    fn decode(
        &self,
        attr: &mut Attribute,
        name: &str,
        resource: Option<&str>,
        value: &str,
    ) -> Result<()>;

    /// Combine `source` into `target` according to `mode`
    fn set(&self, target: &mut Attribute, source: &Attribute, mode: SetMode) -> Result<()>;

    /// Release the attribute's value
    fn free(&self, attr: &mut Attribute) {
        attr.value = AttrValue::None;
        attr.flags.remove(AttrFlags::SET | AttrFlags::DEFAULT);
    }
}

/// Immutable description of one attribute slot
#[derive(Clone)]
pub struct AttributeDef {
    name: AttributeName,
    codec: Arc<dyn AttributeCodec>,
    default: Option<AttrValue>,
    action: Option<PostSetAction>,
}

impl AttributeDef {
    /// Define a slot named `name` handled by `codec`
    pub fn new(name: &str, codec: Arc<dyn AttributeCodec>) -> Result<Self> {
        Ok(AttributeDef {
            name: AttributeName::new(name)?,
            codec,
            default: None,
            action: None,
        })
    }

    /// Value the slot holds before anything sets it
    pub fn with_default(mut self, value: AttrValue) -> Result<Self> {
        if !value.fits(self.kind()) {
            return Err(StateError::Config(format!(
                "default for {} does not match type {:?}",
                self.name,
                self.kind()
            )));
        }
        self.default = Some(value);
        Ok(self)
    }

    pub fn with_action(mut self, action: PostSetAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn kind(&self) -> AttrType {
        self.codec.kind()
    }

    pub fn codec(&self) -> &dyn AttributeCodec {
        self.codec.as_ref()
    }

    pub fn action(&self) -> Option<PostSetAction> {
        self.action
    }

    pub fn default_value(&self) -> Option<&AttrValue> {
        self.default.as_ref()
    }

    /// A fresh attribute at this slot's default
    pub fn initial(&self) -> Attribute {
        let mut attr = Attribute::cleared(self.kind());
        if let Some(value) = &self.default {
            attr.install_default(value.clone());
        }
        attr
    }
}

impl fmt::Debug for AttributeDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributeDef")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("default", &self.default)
            .field("action", &self.action.is_some())
            .finish()
    }
}

/// Ordered, immutable set of attribute definitions
#[derive(Debug, Clone)]
pub struct Schema {
    defs: Arc<Vec<AttributeDef>>,
}

impl Schema {
    /// Build a schema, rejecting duplicate names
    pub fn new(defs: Vec<AttributeDef>) -> Result<Self> {
        for (i, def) in defs.iter().enumerate() {
            if defs[..i].iter().any(|d| d.name() == def.name()) {
                return Err(StateError::Config(format!(
                    "duplicate attribute {} in schema",
                    def.name()
                )));
            }
        }
        Ok(Schema {
            defs: Arc::new(defs),
        })
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&AttributeDef> {
        self.defs.get(index)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.defs.iter().position(|d| d.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AttributeDef> {
        self.defs.iter()
    }
}

/// The attribute slots of one state object
#[derive(Debug, Clone)]
pub struct AttributeSet {
    schema: Schema,
    slots: Vec<Attribute>,
}

impl AttributeSet {
    /// All slots at their schema defaults
    pub fn new(schema: Schema) -> Self {
        let slots = schema.iter().map(AttributeDef::initial).collect();
        AttributeSet { schema, slots }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Attribute> {
        self.schema.position(name).map(|i| &self.slots[i])
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Attribute> {
        self.schema.position(name).map(|i| &mut self.slots[i])
    }

    pub fn slot(&self, index: usize) -> Option<&Attribute> {
        self.slots.get(index)
    }

    /// Definition and attribute of one slot, borrowed together
    pub fn slot_mut(&mut self, index: usize) -> Option<(&AttributeDef, &mut Attribute)> {
        let def = self.schema.defs.get(index)?;
        let attr = self.slots.get_mut(index)?;
        Some((def, attr))
    }

    /// Set an explicit value by name
    ///
    /// Values that would not survive a save and recovery are rejected; see
    /// [`AttrValue::check_storable`].
    pub fn set_value(&mut self, name: &str, value: AttrValue) -> Result<()> {
        let attr = self
            .get_mut(name)
            .ok_or_else(|| StateError::UnknownAttribute(name.to_string()))?;
        if !value.fits(attr.kind()) {
            return Err(StateError::Config(format!(
                "value {:?} does not fit attribute {} of type {:?}",
                value,
                name,
                attr.kind()
            )));
        }
        value.check_storable().map_err(|reason| {
            StateError::Config(format!("value for {} cannot be stored: {}", name, reason))
        })?;
        attr.install(value);
        Ok(())
    }

    /// Unset an attribute by name
    pub fn unset(&mut self, name: &str) -> Result<()> {
        let index = self
            .schema
            .position(name)
            .ok_or_else(|| StateError::UnknownAttribute(name.to_string()))?;
        let (def, attr) = (&self.schema.defs[index], &mut self.slots[index]);
        def.codec().free(attr);
        attr.mark_modified();
        Ok(())
    }

    /// Number of slots holding a value
    pub fn count_set(&self) -> usize {
        self.slots.iter().filter(|a| a.is_set()).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AttributeDef, &Attribute)> {
        self.schema.iter().zip(self.slots.iter())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&AttributeDef, &mut Attribute)> {
        self.schema.defs.iter().zip(self.slots.iter_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;

    fn schema() -> Schema {
        Schema::new(vec![
            AttributeDef::new("max_jobs", codec::long()).unwrap(),
            AttributeDef::new("scheduling", codec::boolean())
                .unwrap()
                .with_default(AttrValue::Boolean(true))
                .unwrap(),
            AttributeDef::new("acl_users", codec::acl()).unwrap(),
        ])
        .unwrap()
    }

    #[test]
    fn test_flags() {
        let mut flags = AttrFlags::empty();
        flags.insert(AttrFlags::SET | AttrFlags::MODIFIED);
        assert!(flags.contains(AttrFlags::SET));
        flags.remove(AttrFlags::MODIFIED);
        assert!(!flags.contains(AttrFlags::MODIFIED));
        assert_eq!(AttrFlags::from_bits_truncate(0xFF01), AttrFlags::SET);
    }

    #[test]
    fn test_defaults_are_set_but_default() {
        let set = AttributeSet::new(schema());
        let sched = set.get("scheduling").unwrap();
        assert!(sched.is_set());
        assert!(sched.is_default());
        assert!(!sched.is_modified());
        assert!(!set.get("max_jobs").unwrap().is_set());
        assert_eq!(set.count_set(), 1);
    }

    #[test]
    fn test_set_value_marks_modified() {
        let mut set = AttributeSet::new(schema());
        set.set_value("max_jobs", AttrValue::Long(100)).unwrap();
        let attr = set.get("max_jobs").unwrap();
        assert!(attr.is_set() && attr.is_modified() && !attr.is_default());
        assert_eq!(attr.value(), &AttrValue::Long(100));
    }

    #[test]
    fn test_set_value_type_mismatch() {
        let mut set = AttributeSet::new(schema());
        assert!(set
            .set_value("max_jobs", AttrValue::String("x".into()))
            .is_err());
        assert!(matches!(
            set.set_value("nope", AttrValue::Long(1)),
            Err(StateError::UnknownAttribute(_))
        ));
    }

    #[test]
    fn test_unstorable_values_rejected() {
        let mut set = AttributeSet::new(schema());
        set.set_value("acl_users", AttrValue::Acl(vec!["alice".into()]))
            .unwrap();

        for value in [
            AttrValue::None,
            AttrValue::Acl(vec![]),
            AttrValue::Acl(vec!["a,b".into()]),
            AttrValue::Acl(vec![" alice".into()]),
            AttrValue::Acl(vec!["bob ".into()]),
            AttrValue::Acl(vec!["".into()]),
            AttrValue::Acl(vec!["carol\0".into()]),
        ] {
            assert!(
                matches!(set.set_value("acl_users", value.clone()), Err(StateError::Config(_))),
                "{:?}",
                value
            );
        }
        // Rejected values leave the slot alone
        assert_eq!(
            set.get("acl_users").unwrap().value(),
            &AttrValue::Acl(vec!["alice".into()])
        );
        assert!(set
            .set_value("acl_users", AttrValue::Acl(vec!["+dave@node 1".into()]))
            .is_ok());
    }

    #[test]
    fn test_check_storable() {
        assert!(AttrValue::String(String::new()).check_storable().is_err());
        assert!(AttrValue::String(" padded, ok ".into()).check_storable().is_ok());
        assert!(AttrValue::Strings(vec!["x".into(), "y,z".into()]).check_storable().is_err());
        assert!(AttrValue::Resources(BTreeMap::new()).check_storable().is_err());

        let mut map = BTreeMap::new();
        map.insert("mem".to_string(), String::new());
        assert!(AttrValue::Resources(map.clone()).check_storable().is_ok());
        map.insert(String::new(), "1".to_string());
        assert!(AttrValue::Resources(map).check_storable().is_err());
        assert!(AttrValue::Long(i64::MIN).check_storable().is_ok());
    }

    #[test]
    fn test_unset() {
        let mut set = AttributeSet::new(schema());
        set.set_value("acl_users", AttrValue::Acl(vec!["alice".into()]))
            .unwrap();
        set.get_mut("acl_users").unwrap().clear_modified();
        set.unset("acl_users").unwrap();
        let attr = set.get("acl_users").unwrap();
        assert!(!attr.is_set());
        assert!(attr.is_modified());
        assert_eq!(attr.value(), &AttrValue::None);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let result = Schema::new(vec![
            AttributeDef::new("comment", codec::string()).unwrap(),
            AttributeDef::new("comment", codec::string()).unwrap(),
        ]);
        assert!(matches!(result, Err(StateError::Config(_))));
    }

    #[test]
    fn test_default_must_fit() {
        let result = AttributeDef::new("max_jobs", codec::long())
            .unwrap()
            .with_default(AttrValue::Boolean(false));
        assert!(result.is_err());
    }
}

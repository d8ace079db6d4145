//! Static traversal of secret-annotated string fields.
//!
//! Every document type registers its annotated leaves through
//! [`SecretFields`], usually with the [`secret_fields!`](crate::secret_fields)
//! macro:
//!
//! ```
//! use cfgseal_config::secret_fields;
//!
//! #[derive(Default)]
//! struct Tls {
//!     cert: String,
//!     key: String,
//! }
//!
//! #[derive(Default)]
//! struct Database {
//!     hostname: String,
//!     port: u16,
//!     password: String,
//!     tls: Option<Tls>,
//! }
//!
//! secret_fields!(Tls { key = "tls" });
//! secret_fields!(Database { password = "k1", tls });
//! ```
//!
//! `name = "param"` marks a `String` or `Option<String>` leaf and attaches
//! its secret parameter. A bare `name` marks a nested composite, which must
//! itself implement [`SecretFields`]. Fields that are not listed are never
//! visited.
//!
//! # Atomicity
//! [`walk`] computes every replacement before it writes any of them. When the
//! callback fails, the error is returned and the document is left exactly as
//! it was.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::BuildHasher;

use cfgseal_common::Result;

/// One step on the way to an annotated leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Field(&'static str),
    Index(usize),
    Key(String),
}

/// Location of an annotated leaf, rendered as `tls.key`,
/// `replicas[1].password` or `tokens.github`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldPath {
    segments: Vec<Segment>,
}

impl FieldPath {
    /// Check if this is the document root.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Number of segments.
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    fn push(&mut self, segment: Segment) {
        self.segments.push(segment);
    }

    fn pop(&mut self) {
        self.segments.pop();
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Index(index) => write!(f, "[{}]", index)?,
                Segment::Field(name) if i == 0 => f.write_str(name)?,
                Segment::Key(key) if i == 0 => f.write_str(key)?,
                Segment::Field(name) => write!(f, ".{}", name)?,
                Segment::Key(key) => write!(f, ".{}", key)?,
            }
        }
        Ok(())
    }
}

type Visit<'a> = dyn FnMut(&FieldPath, &str, &str) -> Result<String> + 'a;

enum Mode<'a> {
    /// Compute replacements without touching the document.
    Stage {
        visit: &'a mut Visit<'a>,
        staged: Vec<Option<String>>,
    },
    /// Write staged replacements in visiting order.
    Apply(std::vec::IntoIter<Option<String>>),
    /// Count present leaves.
    Count(usize),
}

/// Cursor handed to [`SecretFields::walk_secrets`].
pub struct Walker<'a> {
    path: FieldPath,
    mode: Mode<'a>,
}

impl<'a> Walker<'a> {
    fn new(mode: Mode<'a>) -> Self {
        Self {
            path: FieldPath::default(),
            mode,
        }
    }

    /// Descend into a named composite field.
    pub fn field<T>(&mut self, name: &'static str, value: &mut T) -> Result<()>
    where
        T: SecretFields + ?Sized,
    {
        self.nested(Segment::Field(name), value)
    }

    /// Descend into a sequence element.
    pub fn index<T>(&mut self, index: usize, value: &mut T) -> Result<()>
    where
        T: SecretFields + ?Sized,
    {
        self.nested(Segment::Index(index), value)
    }

    /// Descend into a map entry.
    pub fn key<T>(&mut self, key: impl fmt::Display, value: &mut T) -> Result<()>
    where
        T: SecretFields + ?Sized,
    {
        self.nested(Segment::Key(key.to_string()), value)
    }

    /// Visit an annotated string leaf.
    pub fn leaf(&mut self, name: &'static str, param: &str, value: &mut String) -> Result<()> {
        self.path.push(Segment::Field(name));
        let result = self.visit(param, value);
        self.path.pop();
        result
    }

    fn nested<T>(&mut self, segment: Segment, value: &mut T) -> Result<()>
    where
        T: SecretFields + ?Sized,
    {
        self.path.push(segment);
        let result = value.walk_secrets(self);
        self.path.pop();
        result
    }

    fn visit(&mut self, param: &str, value: &mut String) -> Result<()> {
        match &mut self.mode {
            Mode::Stage { visit, staged } => {
                let replacement = (*visit)(&self.path, value, param)?;
                staged.push((replacement != *value).then_some(replacement));
            }
            Mode::Apply(staged) => {
                if let Some(Some(replacement)) = staged.next() {
                    *value = replacement;
                }
            }
            Mode::Count(count) => *count += 1,
        }
        Ok(())
    }
}

/// Registration of a type's secret-annotated leaves.
///
/// Implementations call [`Walker::leaf`] for each annotated string and
/// [`Walker::field`] for each nested composite, in declaration order.
pub trait SecretFields {
    fn walk_secrets(&mut self, walker: &mut Walker<'_>) -> Result<()>;
}

/// String-like leaves that can carry a secret annotation.
pub trait SecretLeaf {
    fn visit_leaf(&mut self, name: &'static str, param: &str, walker: &mut Walker<'_>)
        -> Result<()>;
}

impl SecretLeaf for String {
    fn visit_leaf(
        &mut self,
        name: &'static str,
        param: &str,
        walker: &mut Walker<'_>,
    ) -> Result<()> {
        walker.leaf(name, param, self)
    }
}

impl SecretLeaf for Option<String> {
    fn visit_leaf(
        &mut self,
        name: &'static str,
        param: &str,
        walker: &mut Walker<'_>,
    ) -> Result<()> {
        match self {
            Some(value) => walker.leaf(name, param, value),
            None => Ok(()),
        }
    }
}

impl<T: SecretFields> SecretFields for Option<T> {
    fn walk_secrets(&mut self, walker: &mut Walker<'_>) -> Result<()> {
        match self {
            Some(inner) => inner.walk_secrets(walker),
            None => Ok(()),
        }
    }
}

impl<T: SecretFields + ?Sized> SecretFields for Box<T> {
    fn walk_secrets(&mut self, walker: &mut Walker<'_>) -> Result<()> {
        (**self).walk_secrets(walker)
    }
}

impl<T: SecretFields> SecretFields for Vec<T> {
    fn walk_secrets(&mut self, walker: &mut Walker<'_>) -> Result<()> {
        for (i, item) in self.iter_mut().enumerate() {
            walker.index(i, item)?;
        }
        Ok(())
    }
}

impl<K: fmt::Display, T: SecretFields> SecretFields for BTreeMap<K, T> {
    fn walk_secrets(&mut self, walker: &mut Walker<'_>) -> Result<()> {
        for (key, value) in self.iter_mut() {
            walker.key(key, value)?;
        }
        Ok(())
    }
}

// Iteration order of an unmodified HashMap is stable, so the staging and
// apply passes see entries in the same order.
impl<K: fmt::Display, T: SecretFields, S: BuildHasher> SecretFields for HashMap<K, T, S> {
    fn walk_secrets(&mut self, walker: &mut Walker<'_>) -> Result<()> {
        for (key, value) in self.iter_mut() {
            walker.key(key, value)?;
        }
        Ok(())
    }
}

/// Visit every annotated leaf of `doc` and replace it with the callback's result.
///
/// The callback receives the leaf's path, its current value and its secret
/// parameter. Leaves are visited depth-first in declaration order; absent
/// optional values are skipped.
///
/// # Errors
/// Returns the first callback error. No leaf is modified in that case.
pub fn walk<T, F>(doc: &mut T, mut f: F) -> Result<()>
where
    T: SecretFields + ?Sized,
    F: FnMut(&FieldPath, &str, &str) -> Result<String>,
{
    let mut staging = Walker::new(Mode::Stage {
        visit: &mut f,
        staged: Vec::new(),
    });
    doc.walk_secrets(&mut staging)?;

    let staged = match staging.mode {
        Mode::Stage { staged, .. } => staged,
        _ => unreachable!("walker changed mode while staging"),
    };
    if staged.iter().all(Option::is_none) {
        return Ok(());
    }

    doc.walk_secrets(&mut Walker::new(Mode::Apply(staged.into_iter())))
}

/// Number of annotated leaves currently present in `doc`.
///
/// # Errors
/// Returns any error raised by a hand-written [`SecretFields`] impl.
pub fn count<T>(doc: &mut T) -> Result<usize>
where
    T: SecretFields + ?Sized,
{
    let mut counter = Walker::new(Mode::Count(0));
    doc.walk_secrets(&mut counter)?;
    match counter.mode {
        Mode::Count(count) => Ok(count),
        _ => unreachable!("walker changed mode while counting"),
    }
}

/// Implement [`SecretFields`] for a struct by listing its annotated fields.
///
/// ```
/// # use cfgseal_config::secret_fields;
/// # #[derive(Default)] struct Upstream { token: Option<String> }
/// # #[derive(Default)] struct Service { name: String, api_key: String, upstreams: Vec<Upstream> }
/// secret_fields!(Upstream { token = "upstream" });
/// secret_fields!(Service { api_key = "api", upstreams });
/// ```
#[macro_export]
macro_rules! secret_fields {
    ($ty:ty { $($field:ident $(= $param:expr)?),* $(,)? }) => {
        impl $crate::walk::SecretFields for $ty {
            #[allow(unused_variables)]
            fn walk_secrets(
                &mut self,
                walker: &mut $crate::walk::Walker<'_>,
            ) -> $crate::Result<()> {
                $( $crate::__secret_field!(walker, stringify!($field), &mut self.$field $(, $param)?); )*
                Ok(())
            }
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __secret_field {
    ($walker:ident, $name:expr, $target:expr) => {
        $walker.field($name, $target)?;
    };
    ($walker:ident, $name:expr, $target:expr, $param:expr) => {
        $crate::walk::SecretLeaf::visit_leaf($target, $name, $param, $walker)?;
    };
}

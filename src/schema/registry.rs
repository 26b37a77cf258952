//! Field registry: which caller arrays make up a checkpoint frame.
//!
//! Fields are grouped by [`ParticleCategory`] and kept in registration
//! order. The codec and the mirror both walk the registry in that order, so
//! a frame written by one registry reads back through any registry with the
//! same categories and field names.

use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::container::ElementType;
use crate::error::{CheckpointError, Result};

/// Number of particle categories (fixed by the GADGET/GIZMO snapshot layout).
pub const CATEGORY_COUNT: usize = 6;

/// Particle grouping key used for storage groups and mirror grids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum ParticleCategory {
    Gas = 0,
    Halo = 1,
    Disk = 2,
    Bulge = 3,
    Stars = 4,
    Boundary = 5,
}

impl ParticleCategory {
    /// All categories in index order.
    pub const ALL: [ParticleCategory; CATEGORY_COUNT] = [
        ParticleCategory::Gas,
        ParticleCategory::Halo,
        ParticleCategory::Disk,
        ParticleCategory::Bulge,
        ParticleCategory::Stars,
        ParticleCategory::Boundary,
    ];

    /// Index in `0..CATEGORY_COUNT`.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Look up a category by index.
    pub fn from_index(index: usize) -> Result<Self> {
        Self::ALL.get(index).copied().ok_or_else(|| {
            CheckpointError::InvalidArgument(format!(
                "particle category {index} is outside 0..{CATEGORY_COUNT}"
            ))
        })
    }

    /// Name of the container group holding this category's datasets.
    pub fn group_name(self) -> String {
        format!("PartType{}", self.index())
    }
}

impl fmt::Display for ParticleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} (PartType{})", self, self.index())
    }
}

/// Where a field's values live on the particle mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Centering {
    #[default]
    Node,
    Cell,
}

impl Centering {
    /// XDMF `Center` attribute value.
    pub fn as_str(self) -> &'static str {
        match self {
            Centering::Node => "Node",
            Centering::Cell => "Cell",
        }
    }
}

/// Shape and element type of a registered field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Boolean1D,
    Integer1D,
    Float1D,
    Float3D,
    /// Particle positions; mirrored as mesh geometry rather than an attribute.
    Geometry3D,
}

impl FieldKind {
    /// Values per particle.
    #[inline]
    pub fn components(self) -> usize {
        match self {
            FieldKind::Boolean1D | FieldKind::Integer1D | FieldKind::Float1D => 1,
            FieldKind::Float3D | FieldKind::Geometry3D => 3,
        }
    }

    /// Element type of the stored dataset.
    pub fn element_type(self) -> ElementType {
        match self {
            FieldKind::Boolean1D => ElementType::Bool,
            FieldKind::Integer1D => ElementType::Int32,
            FieldKind::Float1D | FieldKind::Float3D | FieldKind::Geometry3D => {
                ElementType::Float32
            }
        }
    }

    /// Dataset shape for `count` particles: `[count]` or `[count, 3]`.
    pub fn shape(self, count: usize) -> Vec<usize> {
        match self.components() {
            1 => vec![count],
            n => vec![count, n],
        }
    }
}

/// Shared handle to a caller-owned particle array.
///
/// The caller keeps one handle and mutates the data between frames; the
/// registry keeps another and reads (on save) or fills (on load) the same
/// `Vec`. Cloning the handle never copies the data.
pub struct FieldBuffer<T>(Rc<RefCell<Vec<T>>>);

impl<T> FieldBuffer<T> {
    /// Wrap an existing array.
    pub fn new(data: Vec<T>) -> Self {
        Self(Rc::new(RefCell::new(data)))
    }

    /// Immutable view of the array.
    ///
    /// # Panics
    /// Panics if the array is currently borrowed mutably.
    pub fn borrow(&self) -> Ref<'_, Vec<T>> {
        self.0.borrow()
    }

    /// Mutable view of the array.
    ///
    /// # Panics
    /// Panics if the array is currently borrowed.
    pub fn borrow_mut(&self) -> RefMut<'_, Vec<T>> {
        self.0.borrow_mut()
    }

    /// Current array length.
    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy the array out.
    pub fn to_vec(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.0.borrow().clone()
    }

    /// Whether two handles point at the same array.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<T: Clone + Default> FieldBuffer<T> {
    /// Array of `len` default values.
    pub fn zeroed(len: usize) -> Self {
        Self::new(vec![T::default(); len])
    }
}

impl<T> Clone for FieldBuffer<T> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<T> From<Vec<T>> for FieldBuffer<T> {
    fn from(data: Vec<T>) -> Self {
        Self::new(data)
    }
}

impl<T: fmt::Debug> fmt::Debug for FieldBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_borrow() {
            Ok(data) => f.debug_tuple("FieldBuffer").field(&data.len()).finish(),
            Err(_) => f.write_str("FieldBuffer(<borrowed>)"),
        }
    }
}

/// A registered array, tagged with its kind.
#[derive(Debug, Clone)]
pub enum FieldData {
    Boolean1D(FieldBuffer<bool>),
    Integer1D(FieldBuffer<i32>),
    Float1D(FieldBuffer<f32>),
    Float3D(FieldBuffer<[f32; 3]>),
    Geometry3D(FieldBuffer<[f32; 3]>),
}

impl FieldData {
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldData::Boolean1D(_) => FieldKind::Boolean1D,
            FieldData::Integer1D(_) => FieldKind::Integer1D,
            FieldData::Float1D(_) => FieldKind::Float1D,
            FieldData::Float3D(_) => FieldKind::Float3D,
            FieldData::Geometry3D(_) => FieldKind::Geometry3D,
        }
    }

    /// Number of particles currently held (not values).
    pub fn len(&self) -> usize {
        match self {
            FieldData::Boolean1D(b) => b.len(),
            FieldData::Integer1D(b) => b.len(),
            FieldData::Float1D(b) => b.len(),
            FieldData::Float3D(b) | FieldData::Geometry3D(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One registry entry.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub category: ParticleCategory,
    pub centering: Centering,
    /// Dataset name inside the category group.
    pub name: String,
    pub data: FieldData,
}

impl FieldDescriptor {
    #[inline]
    pub fn kind(&self) -> FieldKind {
        self.data.kind()
    }
}

/// Ordered table of registered fields plus per-category particle counts.
#[derive(Debug, Clone, Default)]
pub struct FieldRegistry {
    counts: [usize; CATEGORY_COUNT],
    fields: Vec<FieldDescriptor>,
}

impl FieldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the particle count of a category.
    ///
    /// The count sizes every dataset of the category and is checked against
    /// the file header on load. Counts are stored as `i32` on disk.
    pub fn set_category_count(&mut self, category: ParticleCategory, count: usize) -> Result<()> {
        if count == 0 {
            return Err(CheckpointError::InvalidArgument(format!(
                "particle count for {category} must be positive"
            )));
        }
        if count > i32::MAX as usize {
            return Err(CheckpointError::InvalidArgument(format!(
                "particle count {count} for {category} exceeds {}",
                i32::MAX
            )));
        }
        self.counts[category.index()] = count;
        Ok(())
    }

    /// Particle count of a category (0 when unset).
    #[inline]
    pub fn category_count(&self, category: ParticleCategory) -> usize {
        self.counts[category.index()]
    }

    /// All counts in category index order.
    pub fn counts(&self) -> [usize; CATEGORY_COUNT] {
        self.counts
    }

    /// Append a field to `category`.
    ///
    /// Names are not checked for duplicates; a repeated name in the same
    /// category replaces the earlier dataset in the written file.
    pub fn register(
        &mut self,
        category: ParticleCategory,
        centering: Centering,
        name: impl Into<String>,
        data: FieldData,
    ) {
        self.fields.push(FieldDescriptor {
            category,
            centering,
            name: name.into(),
            data,
        });
    }

    /// Like [`register`](Self::register), but `None` is skipped.
    pub fn register_optional(
        &mut self,
        category: ParticleCategory,
        centering: Centering,
        name: impl Into<String>,
        data: Option<FieldData>,
    ) {
        if let Some(data) = data {
            self.register(category, centering, name, data);
        }
    }

    /// Drop all counts and fields.
    pub fn reset(&mut self) {
        self.counts = [0; CATEGORY_COUNT];
        self.fields.clear();
    }

    /// Registered fields in registration order.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Fields of one category, in registration order.
    pub fn fields_in(&self, category: ParticleCategory) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(move |f| f.category == category)
    }

    /// Categories with a non-zero particle count, in index order.
    pub fn populated_categories(&self) -> impl Iterator<Item = ParticleCategory> + '_ {
        ParticleCategory::ALL
            .into_iter()
            .filter(|c| self.counts[c.index()] > 0)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

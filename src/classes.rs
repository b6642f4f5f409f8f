//! Ordered label sets that define the axes of a confusion matrix.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while building a class set
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassSetError {
    #[error("A class set needs at least 2 classes, got {0}")]
    TooFewClasses(usize),

    #[error("Duplicate class name: {0}")]
    DuplicateName(String),

    #[error("Unknown class name: {0}")]
    UnknownClass(String),
}

/// Names of the genic base-wise classes, in matrix order
pub const GENIC_CLASSES: [&str; 4] = ["ig", "utr", "exon", "intron"];

/// Names of the reading-frame phase classes, in matrix order
pub const PHASE_CLASSES: [&str; 4] = ["no_phase", "phase_0", "phase_1", "phase_2"];

/// An ordered, fixed-size set of mutually exclusive labels.
///
/// The position of a name is its index along both axes of the confusion
/// matrix and along the last axis of every label/prediction array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct ClassSet {
    names: Vec<String>,
}

impl ClassSet {
    /// Build a class set from ordered names
    ///
    /// # Errors
    ///
    /// Returns an error if fewer than two names are given or a name repeats.
    pub fn new<I, S>(names: I) -> Result<Self, ClassSetError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.len() < 2 {
            return Err(ClassSetError::TooFewClasses(names.len()));
        }
        for (i, name) in names.iter().enumerate() {
            if names[..i].contains(name) {
                return Err(ClassSetError::DuplicateName(name.clone()));
            }
        }
        Ok(Self { names })
    }

    /// `ig`, `utr`, `exon`, `intron`
    #[must_use]
    pub fn genic() -> Self {
        Self {
            names: GENIC_CLASSES.iter().map(ToString::to_string).collect(),
        }
    }

    /// `no_phase`, `phase_0`, `phase_1`, `phase_2`
    #[must_use]
    pub fn phase() -> Self {
        Self {
            names: PHASE_CLASSES.iter().map(ToString::to_string).collect(),
        }
    }

    /// Number of classes
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// True if the set holds no classes
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Name of the class at `index`
    #[must_use]
    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    /// Index of the class called `name`
    ///
    /// # Errors
    ///
    /// Returns `ClassSetError::UnknownClass` if no class has that name.
    pub fn index_of(&self, name: &str) -> Result<usize, ClassSetError> {
        self.names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| ClassSetError::UnknownClass(name.to_string()))
    }

    /// Iterate names in matrix order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// All names in matrix order
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }
}

impl TryFrom<Vec<String>> for ClassSet {
    type Error = ClassSetError;

    fn try_from(names: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(names)
    }
}

impl From<ClassSet> for Vec<String> {
    fn from(set: ClassSet) -> Self {
        set.names
    }
}

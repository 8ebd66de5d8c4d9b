use std::fmt;

use thiserror::Error;

use super::lines::LineHandler;
use super::table::{TableImporter, WholeFileImporter};

/// How one registered file is loaded.
pub enum ImportStrategy {
    /// The importer consumes the whole file and reports its row count.
    WholeFile(Box<dyn WholeFileImporter>),
    /// The line engine reads the file and hands each data record over.
    LineBased(Box<dyn LineHandler>),
}

impl ImportStrategy {
    pub fn whole_file(importer: impl WholeFileImporter + 'static) -> Self {
        ImportStrategy::WholeFile(Box::new(importer))
    }

    /// Loads the file into the table named after it.
    pub fn table() -> Self {
        Self::whole_file(TableImporter::new())
    }

    pub fn line_based(handler: impl LineHandler + 'static) -> Self {
        ImportStrategy::LineBased(Box::new(handler))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ImportStrategy::WholeFile(_) => "whole_file",
            ImportStrategy::LineBased(_) => "line_based",
        }
    }
}

impl fmt::Debug for ImportStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("at least one file importer must be registered")]
    Empty,
    #[error("file {0} is registered more than once")]
    DuplicateFile(String),
    #[error("registered file name must not be empty")]
    EmptyFileName,
}

/// Expected files of a bundle and how each is loaded, in load order.
#[derive(Debug)]
pub struct ImporterRegistry {
    entries: Vec<(String, ImportStrategy)>,
}

impl ImporterRegistry {
    pub fn builder() -> ImporterRegistryBuilder {
        ImporterRegistryBuilder::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ImportStrategy)> {
        self.entries
            .iter()
            .map(|(name, strategy)| (name.as_str(), strategy))
    }

    pub fn file_names(&self) -> Vec<&str> {
        self.entries.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn get(&self, file_name: &str) -> Option<&ImportStrategy> {
        self.entries
            .iter()
            .find(|(name, _)| name == file_name)
            .map(|(_, strategy)| strategy)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct ImporterRegistryBuilder {
    entries: Vec<(String, ImportStrategy)>,
}

impl ImporterRegistryBuilder {
    pub fn register(mut self, file_name: impl Into<String>, strategy: ImportStrategy) -> Self {
        self.entries.push((file_name.into(), strategy));
        self
    }

    pub fn build(self) -> Result<ImporterRegistry, RegistryError> {
        if self.entries.is_empty() {
            return Err(RegistryError::Empty);
        }
        for (idx, (name, _)) in self.entries.iter().enumerate() {
            if name.is_empty() {
                return Err(RegistryError::EmptyFileName);
            }
            if self.entries[..idx].iter().any(|(earlier, _)| earlier == name) {
                return Err(RegistryError::DuplicateFile(name.clone()));
            }
        }
        Ok(ImporterRegistry {
            entries: self.entries,
        })
    }
}

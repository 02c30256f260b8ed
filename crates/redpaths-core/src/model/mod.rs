//! Data model: module descriptors, dependency edges, run records, log entries and inputs.

mod input;
mod log;
mod module;
mod run;

pub use input::{InputValue, Parameter, Target};
pub use log::{EventType, LogEntry, LogLevel, LogPage, LogQuery, SYSTEM_PROJECT};
pub use module::{
    InheritanceGraph, Module, ModuleDependency, ModuleOption, ModuleOptionType, ModuleType,
};
pub use run::{ModuleRun, ModuleRunBuilder, VectorRun, VectorRunBuilder};

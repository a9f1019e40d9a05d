pub mod ast;
pub mod expr;
pub mod graph;

pub use ast::{Branch, Condition, ErrorPolicy, ItemsSource, IterateBlock, PipelineDef, StepNode};
pub use expr::{evaluate, evaluate_bool, ExprContext};
pub use graph::{ControlGraph, FlatStep, StepKind};

// mimir-core/src/infrastructure/plugins/mod.rs
//
// Minimal conformance plugins (§9 design note): just enough real plugins
// to exercise the registry/dispatch/executor end-to-end without shipping
// a full plugin ecosystem, which is out of scope. Each one reads its
// input from `config` and/or the run context and writes its result
// through the step's own `output` key — plugins never mutate context
// directly by namespace/key, the executor does that with the value they
// return.

mod data_processing;
mod input;
mod output;

pub use data_processing::{MultiplyPlugin, NoopPlugin};
pub use input::JsonInputPlugin;
pub use output::StdoutOutputPlugin;

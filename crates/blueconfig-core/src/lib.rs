//! `blueconfig-core`: the path/bucket substrate, tree engine,
//! metadata/table layer, schema engine, row layer, index engine, and
//! logical transaction buffer for BlueConfig (§4.A–§4.F, §4.J).
//!
//! `blueconfig-query` builds the expression parser, planner, and
//! aggregation/join layer (§4.G–§4.I) on top of the operations exposed
//! here.

pub mod engine;
pub mod error;
pub mod id;
pub mod index;
pub mod metadata;
pub mod path;
pub mod row;
pub mod schema;
pub mod store;
pub mod tree;
pub mod txn;
pub mod value;

pub use engine::{Engine, EngineConfig};
pub use error::{BlueConfigError, BlueConfigResult};
pub use value::{Row, Value, ValueType};

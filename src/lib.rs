//! Declarative plots of time-series sensor tables.
//!
//! A flat [`ParameterBag`] describes up to ten layers. [`PlotComposer`]
//! fetches each distinct source once (rate-averaged through an on-disk
//! cache when asked), evaluates the layers' expressions, bins them per mode
//! and lays the result out as a renderer-independent [`Figure`].

pub mod average;
pub mod binning;
pub mod cache;
pub mod compose;
pub mod config;
pub mod data;
pub mod error;
pub mod expr;
pub mod fetch;
pub mod figure;
pub mod layer;
pub mod maps;
pub mod options;
pub mod source;
pub mod ticks;

pub use compose::{make_plot, PlotComposer};
pub use config::Config;
pub use error::{PlotError, Result};
pub use fetch::Progress;
pub use figure::Figure;
pub use layer::ParameterBag;

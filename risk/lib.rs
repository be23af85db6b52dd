#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod config;
pub mod data;
pub mod model;
pub mod pipeline;
pub mod reference;
pub mod report;
pub mod scaling;
pub mod stratify;
pub mod types;

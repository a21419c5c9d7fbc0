pub mod backend;
pub mod config;
pub mod datatypes;
pub mod error;
pub mod indexing;
pub mod mesh;
pub mod operator;
pub mod post_processor;
pub mod region;
pub mod rhs;
pub mod solver;

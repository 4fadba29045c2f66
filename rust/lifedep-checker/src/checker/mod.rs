pub mod bindings;
pub mod conventions;
pub mod dependency;
pub mod error;
pub mod error_codes;
pub mod ir;
pub mod propagate;
pub mod signature;
pub mod span;

//! Static security analysis for guest code.
//!
//! The [`SecurityValidator`] classifies submissions per language against a
//! [`SecurityPolicy`] before anything runs, and turns that policy into run
//! restrictions via [`apply_restrictions`].

pub mod policy;
pub mod python;
pub mod restrictions;
pub mod validator;

pub use policy::{LanguagePolicy, ResourceLimits, SecurityPolicy, SuspiciousPattern};
pub use restrictions::{apply_restrictions, ContainerSpec, SANDBOX_USER};
pub use validator::{aggregate_risk, SecurityValidator};

//! # Teamchain Testkit
//!
//! Testing utilities for teamchain.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: a founded team in a store, with helpers to grow its chain
//! - **Generators**: Proptest strategies for keys, restrictions and membership scripts
//!
//! ## Test Fixtures
//!
//! ```rust
//! use teamchain_testkit::TeamFixture;
//!
//! let fixture = TeamFixture::new("acme");
//! let bob = fixture.add_admin("bob@acme.co");
//! assert!(fixture.state().is_admin(&bob.public_key()));
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use teamchain_testkit::{membership_script, TeamFixture};
//!
//! proptest! {
//!     #[test]
//!     fn founder_stays_admin(script in membership_script(4, 16)) {
//!         let fixture = TeamFixture::default();
//!         fixture.play(4, &script);
//!         prop_assert!(fixture.state().is_admin(&fixture.admin.public_key()));
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{team_chain, TeamFixture};
pub use generators::{membership_script, MembershipStep};

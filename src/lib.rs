// Rebalanced: distributed channel rebalancing daemon for a trusted mesh of
// Lightning Network nodes.
//
// To the extent possible under law, the author(s) have dedicated all
// copyright and related and neighboring rights to this software to
// the public domain worldwide. This software is distributed without
// any warranty.
//
// You should have received a copy of the MIT License
// along with this software.
// If not, see <https://opensource.org/licenses/MIT>.

#![recursion_limit = "256"]
// Coding conventions
#![deny(
    non_upper_case_globals,
    non_camel_case_types,
    non_snake_case,
    unused_mut,
    dead_code,
    //missing_docs
)]

#[macro_use]
extern crate amplify;
extern crate serde_crate as serde;

pub mod audit;
pub mod config;
pub mod core;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod ln;
pub mod mesh;
pub mod ownership;
pub mod protocol;
pub mod rebalance;
pub mod registry;

pub use core::{Core, CoreCommand};
pub use error::Error;
pub use identity::{LnIdentity, MeshIdentity};

//! SPDX-License-Identifier: MIT OR AGPL-3.0-or-later
//! Foreign Function Interface bindings

#[cfg(liblxc)]
pub mod liblxc;
pub mod marshal;

pub use marshal::{read_sized_string, split_lines, write_sized_string, CStringArray};

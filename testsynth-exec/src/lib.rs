// SPDX-License-Identifier: Apache-2.0

pub mod context;
pub mod harness;
pub mod interp;
pub mod objective;
pub mod observer;
pub mod registry;
pub mod result;
pub mod scope;
pub mod test_utils;
pub mod value;

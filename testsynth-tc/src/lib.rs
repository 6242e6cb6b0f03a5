// SPDX-License-Identifier: Apache-2.0

pub mod catalog;
pub mod types;
pub mod validate;
pub mod value;

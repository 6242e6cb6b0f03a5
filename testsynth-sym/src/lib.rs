// SPDX-License-Identifier: Apache-2.0

pub mod constraint;
pub mod expr;
pub mod model;

// SPDX-License-Identifier: Apache-2.0

pub mod avm;
pub mod cone;
pub mod engine;
pub mod solver;

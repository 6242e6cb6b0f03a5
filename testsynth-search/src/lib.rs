// SPDX-License-Identifier: Apache-2.0

pub mod crossover;
pub mod insert;
pub mod local;
pub mod minimize;
pub mod mutate;
pub mod pool;

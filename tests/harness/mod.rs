// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: Apache-2.0

//! Test harness for request gate attack simulation.
//!
//! This module provides utilities for simulating various attack patterns
//! against the gate to validate security controls.

pub mod attacks;
pub mod generators;
pub mod metrics;

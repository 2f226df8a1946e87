// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Assertion Helpers

use trap_ua::{DataValue, StatusCode, UaResult};

/// Asserts that `result` failed with `expected`.
#[track_caller]
pub fn assert_status<T: std::fmt::Debug>(result: UaResult<T>, expected: StatusCode) {
    match result {
        Ok(value) => panic!("expected {expected}, got Ok({value:?})"),
        Err(error) => assert_eq!(
            error.status_code(),
            expected,
            "expected {expected}, got error: {error}"
        ),
    }
}

/// Extracts an `f64` from a good value.
#[track_caller]
pub fn f64_value(value: &DataValue) -> f64 {
    assert!(value.is_good(), "value is not good: {value:?}");
    value
        .value
        .as_ref()
        .and_then(|v| v.as_f64())
        .unwrap_or_else(|| panic!("value is not numeric: {value:?}"))
}

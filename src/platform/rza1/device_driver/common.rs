// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2020-2022 Andre Richter <andre.o.richter@gmail.com>

//! Common device driver code.

use core::{marker::PhantomData, ops};

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

pub struct MMIODerefWrapper<T> {
    base_addr: usize,
    phantom: PhantomData<fn() -> T>,
}

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

impl<T> MMIODerefWrapper<T> {
    /// Create an instance.
    ///
    /// # Safety
    ///
    /// `base_addr` must point to a live, suitably aligned region at least
    /// `size_of::<T>()` bytes long for as long as the wrapper is used.
    pub const unsafe fn new(base_addr: usize) -> Self {
        Self {
            base_addr,
            phantom: PhantomData,
        }
    }

    pub const fn base_addr(&self) -> usize {
        self.base_addr
    }
}

/// Deref to RegisterBlock
///
/// Allows writing
/// ```ignore
/// self.registers.SMCR.write(SMCR::SPIE::SET)
/// ```
/// instead of something along the lines of
/// ```ignore
/// unsafe { (*SPIBSC::ptr()).SMCR.write(SMCR::SPIE::SET) }
/// ```
impl<T> ops::Deref for MMIODerefWrapper<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*(self.base_addr as *const _) }
    }
}

//--------------------------------------------------------------------------------------------------
// Testing
//--------------------------------------------------------------------------------------------------

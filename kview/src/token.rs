/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Enumerated tokens naming each axis of the view type space.
//!
//! Tokens are process-wide constants. Each kind has a canonical
//! label (used to build concrete type names), optional aliases, and a
//! stable index given by declaration order. Whether a token is usable
//! in this process is a question for the
//! [`FeatureSet`](crate::registry::FeatureSet), not for the token.

use std::fmt;
use std::hash::Hash;
use std::str::FromStr;

use ndslice::Order;
use serde::Deserialize;
use serde::Serialize;

use crate::error::Result;
use crate::error::ViewError;

/// Common interface of every token kind.
pub trait Token:
    Copy + Eq + Hash + Ord + fmt::Debug + fmt::Display + Send + Sync + 'static
{
    /// Human readable name of the token kind, used in errors.
    const KIND: &'static str;

    /// Every token of this kind, in index order.
    fn all() -> &'static [Self];

    /// The canonical label.
    fn label(self) -> &'static str;

    /// Alternative spellings accepted by [`resolve_token`].
    fn aliases(self) -> &'static [&'static str];

    /// The stable numeric index.
    fn index(self) -> usize;
}

macro_rules! declare_tokens {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident ($kind:literal) {
            $(
                $(#[$vmeta:meta])*
                $variant:ident = $label:literal $(, $alias:literal)*;
            )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        $vis enum $name {
            $(
                $(#[$vmeta])*
                #[serde(rename = $label)]
                $variant,
            )*
        }

        impl Token for $name {
            const KIND: &'static str = $kind;

            fn all() -> &'static [Self] {
                &[$($name::$variant),*]
            }

            fn label(self) -> &'static str {
                match self {
                    $($name::$variant => $label,)*
                }
            }

            fn aliases(self) -> &'static [&'static str] {
                match self {
                    $($name::$variant => &[$($alias),*],)*
                }
            }

            fn index(self) -> usize {
                self as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.label())
            }
        }

        impl FromStr for $name {
            type Err = ViewError;

            fn from_str(s: &str) -> Result<Self> {
                resolve_token(s)
            }
        }
    };
}

declare_tokens! {
    /// The element type stored in a view.
    pub enum ElementType ("dtype") {
        Int8 = "int8";
        Int16 = "int16";
        Int32 = "int32", "int";
        Int64 = "int64", "long";
        Uint8 = "uint8";
        Uint16 = "uint16";
        Uint32 = "uint32", "unsigned", "uint";
        Uint64 = "uint64";
        Float32 = "float32", "float";
        Float64 = "float64", "double";
        Bool = "bool", "bool_", "boolean";
    }
}

declare_tokens! {
    /// An address space category with its own accessibility rules.
    pub enum MemorySpace ("memory space") {
        HostSpace = "HostSpace", "Host";
        HostPinnedSpace = "HostPinnedSpace";
        CudaSpace = "CudaSpace", "Cuda";
        CudaUVMSpace = "CudaUVMSpace";
        CudaHostPinnedSpace = "CudaHostPinnedSpace";
        HIPSpace = "HIPSpace", "HIP";
        HIPHostPinnedSpace = "HIPHostPinnedSpace";
        HBWSpace = "HBWSpace";
        OpenMPTargetSpace = "OpenMPTargetSpace";
        SYCLDeviceUSMSpace = "SYCLDeviceUSMSpace";
        SYCLSharedUSMSpace = "SYCLSharedUSMSpace";
    }
}

declare_tokens! {
    /// The mapping from a multidimensional index to a linear offset.
    pub enum Layout ("layout") {
        /// Row-major, the default.
        LayoutRight = "LayoutRight", "Right", "C";
        /// Column-major.
        LayoutLeft = "LayoutLeft", "Left", "F";
        /// Arbitrary strides. Known, but never constructible.
        LayoutStride = "LayoutStride", "Stride";
    }
}

declare_tokens! {
    /// An access-pattern qualifier on a view.
    pub enum MemoryTrait ("memory trait") {
        /// Owns and reference counts its allocation. The default.
        Managed = "Managed";
        /// Borrows memory owned elsewhere.
        Unmanaged = "Unmanaged";
        Atomic = "Atomic";
        RandomAccess = "RandomAccess";
        Restrict = "Restrict";
    }
}

declare_tokens! {
    /// Where parallel work would be dispatched.
    pub enum ExecutionSpace ("execution space") {
        Serial = "Serial";
        Threads = "Threads";
        OpenMP = "OpenMP";
        Cuda = "Cuda";
        HIP = "HIP";
        SYCL = "SYCL";
        HPX = "HPX";
        OpenMPTarget = "OpenMPTarget";
    }
}

/// Resolve a token from its canonical label, one of its aliases, or
/// its numeric index written in decimal.
pub fn resolve_token<T: Token>(name_or_code: &str) -> Result<T> {
    let key = name_or_code.trim();
    if let Ok(index) = key.parse::<usize>() {
        return resolve_index(index);
    }
    T::all()
        .iter()
        .copied()
        .find(|token| token.label() == key || token.aliases().contains(&key))
        .ok_or_else(|| ViewError::UnknownToken {
            kind: T::KIND,
            value: name_or_code.to_string(),
        })
}

/// Resolve a token from its numeric index.
pub fn resolve_index<T: Token>(index: usize) -> Result<T> {
    T::all()
        .get(index)
        .copied()
        .ok_or_else(|| ViewError::UnknownToken {
            kind: T::KIND,
            value: index.to_string(),
        })
}

impl ElementType {
    /// Size of one element in bytes.
    pub fn size(self) -> usize {
        match self {
            ElementType::Int8 | ElementType::Uint8 | ElementType::Bool => 1,
            ElementType::Int16 | ElementType::Uint16 => 2,
            ElementType::Int32 | ElementType::Uint32 | ElementType::Float32 => 4,
            ElementType::Int64 | ElementType::Uint64 | ElementType::Float64 => 8,
        }
    }

    /// The buffer-protocol (struct module) type code.
    pub fn format(self) -> &'static str {
        match self {
            ElementType::Int8 => "b",
            ElementType::Int16 => "h",
            ElementType::Int32 => "i",
            ElementType::Int64 => "q",
            ElementType::Uint8 => "B",
            ElementType::Uint16 => "H",
            ElementType::Uint32 => "I",
            ElementType::Uint64 => "Q",
            ElementType::Float32 => "f",
            ElementType::Float64 => "d",
            ElementType::Bool => "?",
        }
    }

    /// The numpy scalar type name.
    pub fn numpy_name(self) -> &'static str {
        match self {
            ElementType::Bool => "bool_",
            other => other.label(),
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, ElementType::Float32 | ElementType::Float64)
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            ElementType::Int8 | ElementType::Int16 | ElementType::Int32 | ElementType::Int64
        ) || self.is_float()
    }

    /// Interpret a buffer-protocol format string. Platform dependent
    /// codes (`l`, `n`, ...) are resolved by `item_size`; byte orders
    /// other than native are rejected.
    pub fn from_format(format: &str, item_size: usize) -> Result<Self> {
        let unsupported = || ViewError::UnsupportedFormat {
            format: format.to_string(),
            item_size,
        };
        let code = match format.as_bytes() {
            [code] => *code,
            [b'@' | b'=', code] => *code,
            [b'<', code] if cfg!(target_endian = "little") => *code,
            [b'>' | b'!', code] if cfg!(target_endian = "big") => *code,
            _ => return Err(unsupported()),
        };
        let dtype = match (code, item_size) {
            (b'?', 1) => ElementType::Bool,
            (b'b' | b'h' | b'i' | b'l' | b'q' | b'n', 1) => ElementType::Int8,
            (b'b' | b'h' | b'i' | b'l' | b'q' | b'n', 2) => ElementType::Int16,
            (b'b' | b'h' | b'i' | b'l' | b'q' | b'n', 4) => ElementType::Int32,
            (b'b' | b'h' | b'i' | b'l' | b'q' | b'n', 8) => ElementType::Int64,
            (b'B' | b'H' | b'I' | b'L' | b'Q' | b'N', 1) => ElementType::Uint8,
            (b'B' | b'H' | b'I' | b'L' | b'Q' | b'N', 2) => ElementType::Uint16,
            (b'B' | b'H' | b'I' | b'L' | b'Q' | b'N', 4) => ElementType::Uint32,
            (b'B' | b'H' | b'I' | b'L' | b'Q' | b'N', 8) => ElementType::Uint64,
            (b'f' | b'd', 4) => ElementType::Float32,
            (b'f' | b'd', 8) => ElementType::Float64,
            _ => return Err(unsupported()),
        };
        Ok(dtype)
    }
}

impl MemorySpace {
    /// Whether host code may dereference memory in this space.
    pub fn host_accessible(self) -> bool {
        matches!(
            self,
            MemorySpace::HostSpace
                | MemorySpace::HostPinnedSpace
                | MemorySpace::CudaUVMSpace
                | MemorySpace::CudaHostPinnedSpace
                | MemorySpace::HIPHostPinnedSpace
                | MemorySpace::HBWSpace
                | MemorySpace::SYCLSharedUSMSpace
        )
    }
}

impl Layout {
    /// The dense order this layout packs elements in.
    pub fn order(self) -> Option<Order> {
        match self {
            Layout::LayoutRight => Some(Order::RowMajor),
            Layout::LayoutLeft => Some(Order::ColumnMajor),
            Layout::LayoutStride => None,
        }
    }

    pub fn from_order(order: Order) -> Self {
        match order {
            Order::RowMajor => Layout::LayoutRight,
            Order::ColumnMajor => Layout::LayoutLeft,
        }
    }
}

impl MemoryTrait {
    /// Whether views with this trait own their allocation.
    pub fn owns_memory(self) -> bool {
        self != MemoryTrait::Unmanaged
    }
}

impl ExecutionSpace {
    /// The memory space work in this execution space allocates in by
    /// default.
    pub fn default_memory_space(self) -> MemorySpace {
        match self {
            ExecutionSpace::Serial
            | ExecutionSpace::Threads
            | ExecutionSpace::OpenMP
            | ExecutionSpace::HPX => MemorySpace::HostSpace,
            ExecutionSpace::Cuda => MemorySpace::CudaSpace,
            ExecutionSpace::HIP => MemorySpace::HIPSpace,
            ExecutionSpace::SYCL => MemorySpace::SYCLDeviceUSMSpace,
            ExecutionSpace::OpenMPTarget => MemorySpace::OpenMPTargetSpace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_and_aliases() {
        assert_eq!(
            resolve_token::<ElementType>("double").unwrap(),
            ElementType::Float64
        );
        assert_eq!(
            resolve_token::<ElementType>("float").unwrap(),
            ElementType::Float32
        );
        assert_eq!(
            "CudaUVMSpace".parse::<MemorySpace>().unwrap(),
            MemorySpace::CudaUVMSpace
        );
        assert_eq!(
            resolve_token::<Layout>("F").unwrap(),
            Layout::LayoutLeft
        );
        assert_eq!(MemoryTrait::RandomAccess.to_string(), "RandomAccess");
    }

    #[test]
    fn test_indices() {
        for (i, dtype) in ElementType::all().iter().enumerate() {
            assert_eq!(dtype.index(), i);
            assert_eq!(resolve_index::<ElementType>(i).unwrap(), *dtype);
            assert_eq!(
                resolve_token::<ElementType>(&i.to_string()).unwrap(),
                *dtype
            );
        }
        assert_eq!(
            resolve_token::<MemoryTrait>(" 1 ").unwrap(),
            MemoryTrait::Unmanaged
        );
    }

    #[test]
    fn test_unknown() {
        let err = resolve_token::<ElementType>("complex128").unwrap_err();
        assert!(matches!(
            err,
            ViewError::UnknownToken { kind: "dtype", ref value } if value == "complex128"
        ));
        assert!(matches!(
            resolve_index::<Layout>(3),
            Err(ViewError::UnknownToken { kind: "layout", .. })
        ));
    }

    #[test]
    fn test_formats() {
        for &dtype in ElementType::all() {
            assert_eq!(
                ElementType::from_format(dtype.format(), dtype.size()).unwrap(),
                dtype
            );
        }
        assert_eq!(
            ElementType::from_format("l", 8).unwrap(),
            ElementType::Int64
        );
        assert_eq!(
            ElementType::from_format("=L", 4).unwrap(),
            ElementType::Uint32
        );
        assert!(matches!(
            ElementType::from_format("e", 2),
            Err(ViewError::UnsupportedFormat { .. })
        ));
        assert!(ElementType::from_format("Zd", 16).is_err());
    }

    #[test]
    fn test_serde_uses_labels() {
        let json = serde_json::to_string(&ElementType::Float64).unwrap();
        assert_eq!(json, "\"float64\"");
        let space: MemorySpace = serde_json::from_str("\"CudaSpace\"").unwrap();
        assert_eq!(space, MemorySpace::CudaSpace);
    }

    #[test]
    fn test_host_accessibility() {
        assert!(MemorySpace::HostSpace.host_accessible());
        assert!(MemorySpace::CudaUVMSpace.host_accessible());
        assert!(!MemorySpace::CudaSpace.host_accessible());
        assert_eq!(
            ExecutionSpace::Cuda.default_memory_space(),
            MemorySpace::CudaSpace
        );
    }
}

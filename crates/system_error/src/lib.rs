#![no_std]

use num_derive::{FromPrimitive, ToPrimitive};

/// POSIX-errno-flavored configuration error.
///
/// Only the codes this crate's configuration paths can actually raise are
/// represented: invalid AES key length, invalid flow count, overflow of the
/// flow-id space, and allocation failure when sizing a flow table. Hot-path
/// operations never return this type; see the crate-level docs.
#[repr(i32)]
#[derive(Debug, FromPrimitive, ToPrimitive, PartialEq, Eq, Clone, Copy)]
#[allow(non_camel_case_types)]
pub enum NetCoreError {
    /// 没有足够的空间 Not enough space.
    ENOMEM = 12,
    /// 不可用的参数 Invalid argument.
    EINVAL = 22,
    /// 设备上没有空间 No space left on device.
    ENOSPC = 28,
    /// 数值过大，产生溢出 Value too large to be stored in data type.
    EOVERFLOW = 74,
}

impl NetCoreError {
    /// 把posix错误码转换为错误枚举类型。
    pub fn from_posix_errno(errno: i32) -> Option<NetCoreError> {
        // posix 错误码是小于0的
        if errno >= 0 {
            return None;
        }
        <Self as num_traits::FromPrimitive>::from_i32(-errno)
    }

    /// 把错误枚举类型转换为负数posix错误码。
    pub fn to_posix_errno(&self) -> i32 {
        -<Self as num_traits::ToPrimitive>::to_i32(self).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_posix_errno() {
        assert_eq!(NetCoreError::EINVAL.to_posix_errno(), -22);
        assert_eq!(
            NetCoreError::from_posix_errno(-22),
            Some(NetCoreError::EINVAL)
        );
    }

    #[test]
    fn rejects_non_negative_errno() {
        assert_eq!(NetCoreError::from_posix_errno(0), None);
        assert_eq!(NetCoreError::from_posix_errno(5), None);
    }
}

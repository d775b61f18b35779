//! Extended attribute calls on backing paths.
//!
//! All calls operate on the entry itself and never follow a trailing
//! symlink (`l*xattr` on Linux, `XATTR_NOFOLLOW` on macOS).

use crate::error::PassResult;
use nix::errno::Errno;
use std::ffi::{CString, OsStr};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

/// Result of a `getxattr`/`listxattr` call.
///
/// A request with a zero-sized buffer is a size probe and yields
/// [`XattrValue::Size`]; any other request yields the bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XattrValue {
    Size(u32),
    Data(Vec<u8>),
}

fn c_string(bytes: &[u8]) -> PassResult<CString> {
    Ok(CString::new(bytes).map_err(|_| Errno::EINVAL)?)
}

fn check_len(res: libc::ssize_t) -> PassResult<usize> {
    if res < 0 {
        return Err(io::Error::last_os_error().into());
    }
    #[allow(clippy::cast_sign_loss)]
    let len = res as usize;
    Ok(len)
}

fn check_unit(res: libc::c_int) -> PassResult<()> {
    if res < 0 {
        return Err(io::Error::last_os_error().into());
    }
    Ok(())
}

fn size_reply(len: usize) -> PassResult<XattrValue> {
    let len = u32::try_from(len).map_err(|_| Errno::E2BIG)?;
    Ok(XattrValue::Size(len))
}

pub fn set(path: &Path, name: &OsStr, value: &[u8], flags: i32) -> PassResult<()> {
    let path = c_string(path.as_os_str().as_bytes())?;
    let name = c_string(name.as_bytes())?;
    // SAFETY: both strings are NUL-terminated and `value` is valid for
    // `value.len()` bytes for the duration of the call.
    let res = unsafe { sys::set(&path, &name, value, flags) };
    check_unit(res)
}

pub fn get(path: &Path, name: &OsStr, size: u32) -> PassResult<XattrValue> {
    let path = c_string(path.as_os_str().as_bytes())?;
    let name = c_string(name.as_bytes())?;
    if size == 0 {
        // SAFETY: a null buffer with length 0 asks only for the size.
        let res = unsafe { sys::get(&path, &name, std::ptr::null_mut(), 0) };
        return size_reply(check_len(res)?);
    }
    let mut buf = vec![0u8; size as usize];
    // SAFETY: `buf` is valid for `buf.len()` writable bytes.
    let res = unsafe { sys::get(&path, &name, buf.as_mut_ptr().cast(), buf.len()) };
    let len = check_len(res)?;
    buf.truncate(len);
    Ok(XattrValue::Data(buf))
}

pub fn list(path: &Path, size: u32) -> PassResult<XattrValue> {
    let path = c_string(path.as_os_str().as_bytes())?;
    if size == 0 {
        // SAFETY: a null buffer with length 0 asks only for the size.
        let res = unsafe { sys::list(&path, std::ptr::null_mut(), 0) };
        return size_reply(check_len(res)?);
    }
    let mut buf = vec![0u8; size as usize];
    // SAFETY: `buf` is valid for `buf.len()` writable bytes.
    let res = unsafe { sys::list(&path, buf.as_mut_ptr().cast(), buf.len()) };
    let len = check_len(res)?;
    buf.truncate(len);
    Ok(XattrValue::Data(buf))
}

pub fn remove(path: &Path, name: &OsStr) -> PassResult<()> {
    let path = c_string(path.as_os_str().as_bytes())?;
    let name = c_string(name.as_bytes())?;
    // SAFETY: both strings are NUL-terminated.
    let res = unsafe { sys::remove(&path, &name) };
    check_unit(res)
}

#[cfg(target_os = "linux")]
mod sys {
    use libc::{c_char, c_int, c_void, size_t, ssize_t};
    use std::ffi::CStr;

    pub unsafe fn set(path: &CStr, name: &CStr, value: &[u8], flags: c_int) -> c_int {
        unsafe {
            libc::lsetxattr(
                path.as_ptr(),
                name.as_ptr(),
                value.as_ptr().cast::<c_void>(),
                value.len(),
                flags,
            )
        }
    }

    pub unsafe fn get(path: &CStr, name: &CStr, buf: *mut c_void, size: size_t) -> ssize_t {
        unsafe { libc::lgetxattr(path.as_ptr(), name.as_ptr(), buf, size) }
    }

    pub unsafe fn list(path: &CStr, buf: *mut c_char, size: size_t) -> ssize_t {
        unsafe { libc::llistxattr(path.as_ptr(), buf, size) }
    }

    pub unsafe fn remove(path: &CStr, name: &CStr) -> c_int {
        unsafe { libc::lremovexattr(path.as_ptr(), name.as_ptr()) }
    }
}

#[cfg(target_os = "macos")]
mod sys {
    use libc::{c_char, c_int, c_void, size_t, ssize_t, XATTR_NOFOLLOW};
    use std::ffi::CStr;

    pub unsafe fn set(path: &CStr, name: &CStr, value: &[u8], flags: c_int) -> c_int {
        unsafe {
            libc::setxattr(
                path.as_ptr(),
                name.as_ptr(),
                value.as_ptr().cast::<c_void>(),
                value.len(),
                0,
                flags | XATTR_NOFOLLOW,
            )
        }
    }

    pub unsafe fn get(path: &CStr, name: &CStr, buf: *mut c_void, size: size_t) -> ssize_t {
        unsafe { libc::getxattr(path.as_ptr(), name.as_ptr(), buf, size, 0, XATTR_NOFOLLOW) }
    }

    pub unsafe fn list(path: &CStr, buf: *mut c_char, size: size_t) -> ssize_t {
        unsafe { libc::listxattr(path.as_ptr(), buf, size, XATTR_NOFOLLOW) }
    }

    pub unsafe fn remove(path: &CStr, name: &CStr) -> c_int {
        unsafe { libc::removexattr(path.as_ptr(), name.as_ptr(), XATTR_NOFOLLOW) }
    }
}

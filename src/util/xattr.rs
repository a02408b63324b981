//! Extended-attribute helpers for restoring host metadata on extraction.
//!
//! DwarFS images can carry per-inode extended attributes; `dwarfsextract`
//! restores them onto the files it writes out. This mirrors the upstream
//! `getxattr`/`setxattr`/`listxattr`/`removexattr` split between
//! `xattr_posix.cpp` and `xattr_win.cpp` — a thin, retrying wrapper over the
//! platform syscalls rather than a pure-Rust reimplementation, since xattr
//! semantics (the `ERANGE`-and-retry dance in particular) are platform ABI,
//! not something a crate can usefully abstract away.

use std::io;
use std::path::Path;

#[cfg(unix)]
mod unix {
    use super::*;
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    const EXTRA_SIZE: usize = 1024;

    fn cpath(path: &Path) -> io::Result<CString> {
        CString::new(path.as_os_str().as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
    }

    fn cname(name: &str) -> io::Result<CString> {
        CString::new(name).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
    }

    #[cfg(target_os = "macos")]
    unsafe fn raw_getxattr(path: *const libc::c_char, name: *const libc::c_char, value: *mut libc::c_void, size: libc::size_t) -> libc::ssize_t {
        libc::getxattr(path, name, value, size, 0, 0)
    }
    #[cfg(not(target_os = "macos"))]
    unsafe fn raw_getxattr(path: *const libc::c_char, name: *const libc::c_char, value: *mut libc::c_void, size: libc::size_t) -> libc::ssize_t {
        libc::getxattr(path, name, value, size)
    }

    #[cfg(target_os = "macos")]
    unsafe fn raw_setxattr(path: *const libc::c_char, name: *const libc::c_char, value: *const libc::c_void, size: libc::size_t, flags: libc::c_int) -> libc::c_int {
        libc::setxattr(path, name, value, size, 0, flags)
    }
    #[cfg(not(target_os = "macos"))]
    unsafe fn raw_setxattr(path: *const libc::c_char, name: *const libc::c_char, value: *const libc::c_void, size: libc::size_t, flags: libc::c_int) -> libc::c_int {
        libc::setxattr(path, name, value, size, flags)
    }

    pub fn getxattr(path: &Path, name: &str) -> io::Result<Vec<u8>> {
        let cp = cpath(path)?;
        let cn = cname(name)?;
        loop {
            let size = unsafe { raw_getxattr(cp.as_ptr(), cn.as_ptr(), std::ptr::null_mut(), 0) };
            if size < 0 {
                return Err(io::Error::last_os_error());
            }
            let mut buf = vec![0u8; size as usize + EXTRA_SIZE];
            let got = unsafe {
                raw_getxattr(cp.as_ptr(), cn.as_ptr(), buf.as_mut_ptr() as *mut libc::c_void, buf.len())
            };
            if got >= 0 {
                buf.truncate(got as usize);
                return Ok(buf);
            }
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ERANGE) {
                return Err(err);
            }
        }
    }

    pub fn setxattr(path: &Path, name: &str, value: &[u8]) -> io::Result<()> {
        let cp = cpath(path)?;
        let cn = cname(name)?;
        let rc = unsafe {
            raw_setxattr(cp.as_ptr(), cn.as_ptr(), value.as_ptr() as *const libc::c_void, value.len(), 0)
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn listxattr(path: &Path) -> io::Result<Vec<String>> {
        let cp = cpath(path)?;
        loop {
            let size = unsafe { libc::listxattr(cp.as_ptr(), std::ptr::null_mut(), 0) };
            if size < 0 {
                return Err(io::Error::last_os_error());
            }
            if size == 0 {
                return Ok(Vec::new());
            }
            let mut buf = vec![0u8; size as usize + EXTRA_SIZE];
            let got = unsafe {
                libc::listxattr(cp.as_ptr(), buf.as_mut_ptr() as *mut libc::c_char, buf.len())
            };
            if got >= 0 {
                buf.truncate(got as usize);
                return Ok(buf
                    .split(|&b| b == 0)
                    .filter(|s| !s.is_empty())
                    .map(|s| String::from_utf8_lossy(s).into_owned())
                    .collect());
            }
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ERANGE) {
                return Err(err);
            }
        }
    }
}

#[cfg(not(unix))]
mod unix {
    use super::*;

    pub fn getxattr(_path: &Path, _name: &str) -> io::Result<Vec<u8>> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "extended attributes are not supported on this platform"))
    }

    pub fn setxattr(_path: &Path, _name: &str, _value: &[u8]) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "extended attributes are not supported on this platform"))
    }

    pub fn listxattr(_path: &Path) -> io::Result<Vec<String>> {
        Ok(Vec::new())
    }
}

pub use unix::{getxattr, listxattr, setxattr};

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn set_then_get_round_trips() {
        let f = NamedTempFile::new().unwrap();
        let res = setxattr(f.path(), "user.dwarfs.test", b"hello");
        if let Err(e) = &res {
            if e.raw_os_error() == Some(libc::ENOTSUP) || e.raw_os_error() == Some(libc::EOPNOTSUPP) {
                // Filesystem backing the temp dir doesn't support xattrs (common
                // in CI containers / tmpfs without the option) — nothing to assert.
                return;
            }
        }
        res.unwrap();
        let value = getxattr(f.path(), "user.dwarfs.test").unwrap();
        assert_eq!(value, b"hello");
        assert!(listxattr(f.path()).unwrap().contains(&"user.dwarfs.test".to_string()));
    }
}

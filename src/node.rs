//! Low-level device-node I/O boundary
//!
//! The service only needs three operations against a raw node: open it
//! read-only, ask the kernel for the report-descriptor size, and read the
//! descriptor bytes. [`DeviceNodeIo`] is the seam; [`HidrawNode`] is the
//! Linux implementation over the hidraw ioctls. Closing is RAII: dropping a
//! [`NodeHandle`] releases the file descriptor.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

#[cfg(target_os = "linux")]
use std::os::fd::AsRawFd;

/// Upper bound the kernel places on report descriptors
/// (`HID_MAX_DESCRIPTOR_SIZE`).
pub const MAX_DESCRIPTOR_SIZE: usize = 4096;

/// An open device node.
///
/// Backends that do not really open a file (test fakes) leave `file` unset
/// and key their state off `path`.
#[derive(Debug)]
pub struct NodeHandle {
    path: PathBuf,
    file: Option<File>,
}

impl NodeHandle {
    /// Handle over an actually open file.
    pub fn open(path: PathBuf, file: File) -> Self {
        Self {
            path,
            file: Some(file),
        }
    }

    /// Path-only handle for backends without real files.
    pub fn detached(path: PathBuf) -> Self {
        Self { path, file: None }
    }

    /// Node path this handle was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Blocking I/O against raw device nodes.
///
/// Implementations must not panic on kernel-reported failures; every
/// syscall-level problem comes back as `io::Error` and the service treats it
/// as a single-device failure.
pub trait DeviceNodeIo: Send + Sync {
    /// Open `path` read-only.
    fn open_read_only(&self, path: &Path) -> io::Result<NodeHandle>;

    /// Declared size of the node's report descriptor, in bytes.
    fn descriptor_size(&self, node: &NodeHandle) -> io::Result<usize>;

    /// Read exactly `size` descriptor bytes.
    fn read_descriptor(&self, node: &NodeHandle, size: usize) -> io::Result<Vec<u8>>;
}

/// hidraw ioctl implementation of [`DeviceNodeIo`].
#[cfg(target_os = "linux")]
#[derive(Debug, Default, Clone, Copy)]
pub struct HidrawNode;

#[cfg(target_os = "linux")]
mod hidraw {
    use super::MAX_DESCRIPTOR_SIZE;

    /// `struct hidraw_report_descriptor` from `<linux/hidraw.h>`.
    #[repr(C)]
    pub struct ReportDescriptor {
        pub size: u32,
        pub value: [u8; MAX_DESCRIPTOR_SIZE],
    }

    /// `_IOR('H', nr, size)` without pulling in a bindings crate.
    const fn ior(nr: libc::c_ulong, size: usize) -> libc::c_ulong {
        const IOC_READ: libc::c_ulong = 2;
        (IOC_READ << 30) | ((size as libc::c_ulong) << 16) | ((b'H' as libc::c_ulong) << 8) | nr
    }

    pub const HIDIOCGRDESCSIZE: libc::c_ulong = ior(0x01, std::mem::size_of::<libc::c_int>());
    pub const HIDIOCGRDESC: libc::c_ulong = ior(0x02, std::mem::size_of::<ReportDescriptor>());
}

#[cfg(target_os = "linux")]
impl DeviceNodeIo for HidrawNode {
    fn open_read_only(&self, path: &Path) -> io::Result<NodeHandle> {
        let file = File::open(path)?;
        Ok(NodeHandle::open(path.to_path_buf(), file))
    }

    fn descriptor_size(&self, node: &NodeHandle) -> io::Result<usize> {
        let file = node
            .file
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "node is not open"))?;

        let mut size: libc::c_int = 0;
        // SAFETY: HIDIOCGRDESCSIZE writes a single int through the pointer.
        let res = unsafe {
            libc::ioctl(
                file.as_raw_fd(),
                hidraw::HIDIOCGRDESCSIZE as _,
                &mut size as *mut libc::c_int,
            )
        };
        if res < 0 {
            return Err(io::Error::last_os_error());
        }
        if size < 0 || size as usize > MAX_DESCRIPTOR_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("kernel reported descriptor size {size}"),
            ));
        }
        Ok(size as usize)
    }

    fn read_descriptor(&self, node: &NodeHandle, size: usize) -> io::Result<Vec<u8>> {
        let file = node
            .file
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "node is not open"))?;
        if size > MAX_DESCRIPTOR_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("descriptor size {size} exceeds hidraw maximum"),
            ));
        }

        let mut desc = hidraw::ReportDescriptor {
            size: size as u32,
            value: [0; MAX_DESCRIPTOR_SIZE],
        };
        // SAFETY: HIDIOCGRDESC reads `size` and fills `value` within bounds.
        let res = unsafe {
            libc::ioctl(
                file.as_raw_fd(),
                hidraw::HIDIOCGRDESC as _,
                &mut desc as *mut hidraw::ReportDescriptor,
            )
        };
        if res < 0 {
            return Err(io::Error::last_os_error());
        }
        let returned = desc.size as usize;
        if returned < size {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("short descriptor read: wanted {size}, got {returned}"),
            ));
        }
        Ok(desc.value[..size].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detached_handle_keeps_path() {
        let handle = NodeHandle::detached("/dev/hidraw7".into());
        assert_eq!(handle.path(), Path::new("/dev/hidraw7"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_ioctl_request_values() {
        // Stable kernel ABI values for the generic ioctl layout.
        assert_eq!(hidraw::HIDIOCGRDESCSIZE, 0x8004_4801);
        assert_eq!(hidraw::HIDIOCGRDESC, 0x9004_4802);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_descriptor_size_requires_open_node() {
        let io = HidrawNode;
        let handle = NodeHandle::detached("/dev/hidraw7".into());
        assert!(io.descriptor_size(&handle).is_err());
    }
}

//! Accelerator devices and the convolution program built for them.
//!
//! The accelerator path stops after the program compiles: no buffers are
//! uploaded and no kernel is enqueued. Device discovery and compilation go
//! through OpenCL when the `opencl` feature is enabled; without it no
//! devices are reported.

use std::fmt;
use std::io::{self, Write};

use crate::{ConvBenchError, Result};

/// OpenCL C version of the host kernel, one work item per output sample.
pub const CONVOLUTION_KERNEL_SOURCE: &str = r#"
__kernel void convolve(
    const __global float * pInput,
    __constant float * pFilter,
    __global float * pOutput,
    const int nInWidth,
    const int nFilterWidth)
{
    const int nWidth = get_global_size(0);
    const int xOut = get_global_id(0);
    const int yOut = get_global_id(1);

    float sum = 0;
    for (int r = 0; r < nFilterWidth; r++)
    {
        const int idxIn = (yOut + r) * nInWidth + xOut;
        for (int c = 0; c < nFilterWidth; c++)
        {
            sum += pFilter[r * nFilterWidth + c] * pInput[idxIn + c];
        }
    }

    pOutput[yOut * nWidth + xOut] = sum;
}
"#;

/// Broad class of a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceKind {
    /// Host processor exposed through the runtime.
    Cpu,
    /// Graphics processor.
    Gpu,
    /// Dedicated accelerator card.
    Accelerator,
    /// Anything else the runtime reports.
    Other,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceKind::Cpu => "CPU",
            DeviceKind::Gpu => "GPU",
            DeviceKind::Accelerator => "Accelerator",
            DeviceKind::Other => "Other",
        };
        f.write_str(s)
    }
}

/// A device found by [`enumerate_devices`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Position in the enumeration order.
    pub index: usize,
    /// Device name as reported by the driver.
    pub name: String,
    /// Vendor string.
    pub vendor: String,
    /// Device class.
    pub kind: DeviceKind,
    /// Parallel compute units.
    pub compute_units: u32,
    /// Global memory in bytes.
    pub global_mem_bytes: u64,
    /// Runtime version string.
    pub version: String,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Device {}: {}", self.index, self.name)?;
        writeln!(f, "  Vendor:          {}", self.vendor)?;
        writeln!(f, "  Type:            {}", self.kind)?;
        writeln!(f, "  Compute units:   {}", self.compute_units)?;
        writeln!(
            f,
            "  Global memory:   {} MB",
            self.global_mem_bytes / (1024 * 1024)
        )?;
        write!(f, "  Version:         {}", self.version)
    }
}

/// Write the diagnostic report for `device`.
///
/// # Errors
/// Whatever `out` returns.
pub fn print_diagnostics(device: &DeviceInfo, out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "{device}")
}

/// Every device the runtime reports, in driver order.
///
/// Never fails: a missing runtime yields an empty list.
#[cfg(feature = "opencl")]
pub fn enumerate_devices() -> Vec<DeviceInfo> {
    use opencl3::device::{
        get_all_devices, Device, CL_DEVICE_TYPE_ACCELERATOR, CL_DEVICE_TYPE_ALL,
        CL_DEVICE_TYPE_CPU, CL_DEVICE_TYPE_GPU,
    };

    let ids = match get_all_devices(CL_DEVICE_TYPE_ALL) {
        Ok(ids) => ids,
        Err(e) => {
            tracing::debug!("OpenCL device enumeration failed: {e}");
            return Vec::new();
        }
    };

    ids.into_iter()
        .enumerate()
        .map(|(index, id)| {
            let dev = Device::new(id);
            let dev_type = dev.dev_type().unwrap_or(0);
            let kind = if dev_type & CL_DEVICE_TYPE_GPU != 0 {
                DeviceKind::Gpu
            } else if dev_type & CL_DEVICE_TYPE_CPU != 0 {
                DeviceKind::Cpu
            } else if dev_type & CL_DEVICE_TYPE_ACCELERATOR != 0 {
                DeviceKind::Accelerator
            } else {
                DeviceKind::Other
            };
            DeviceInfo {
                index,
                name: dev.name().unwrap_or_default().trim().to_string(),
                vendor: dev.vendor().unwrap_or_default().trim().to_string(),
                kind,
                compute_units: dev.max_compute_units().unwrap_or(0),
                global_mem_bytes: dev.global_mem_size().unwrap_or(0),
                version: dev.version().unwrap_or_default().trim().to_string(),
            }
        })
        .collect()
}

/// Every device the runtime reports, in driver order.
///
/// Built without the `opencl` feature, so there is no runtime to ask.
#[cfg(not(feature = "opencl"))]
pub fn enumerate_devices() -> Vec<DeviceInfo> {
    Vec::new()
}

/// A program compiled for one device.
pub struct AcceleratorProgram {
    device: String,
    #[cfg(feature = "opencl")]
    _program: opencl3::program::Program,
    #[cfg(feature = "opencl")]
    _context: opencl3::context::Context,
}

impl fmt::Debug for AcceleratorProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcceleratorProgram")
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

impl AcceleratorProgram {
    /// Compile `source` for `device`.
    ///
    /// # Errors
    /// [`ConvBenchError::AcceleratorBuild`] carrying the compiler log.
    #[cfg(feature = "opencl")]
    pub fn build(device: &DeviceInfo, source: &str) -> Result<Self> {
        use opencl3::context::Context;
        use opencl3::device::{get_all_devices, Device, CL_DEVICE_TYPE_ALL};
        use opencl3::program::Program;

        let fail = |log: String| ConvBenchError::AcceleratorBuild {
            device: device.name.clone(),
            log,
        };

        let ids = get_all_devices(CL_DEVICE_TYPE_ALL)
            .map_err(|e| fail(format!("device enumeration failed: {e}")))?;
        let id = *ids
            .get(device.index)
            .ok_or_else(|| fail(format!("device {} disappeared", device.index)))?;

        let context = Context::from_device(&Device::new(id))
            .map_err(|e| fail(format!("context creation failed: {e}")))?;
        let program = Program::create_and_build_from_source(&context, source, "").map_err(fail)?;

        Ok(AcceleratorProgram {
            device: device.name.clone(),
            _program: program,
            _context: context,
        })
    }

    /// Compile `source` for `device`.
    ///
    /// # Errors
    /// Always [`ConvBenchError::AcceleratorBuild`]: there is no compiler
    /// without the `opencl` feature.
    #[cfg(not(feature = "opencl"))]
    pub fn build(device: &DeviceInfo, source: &str) -> Result<Self> {
        let _ = source;
        Err(ConvBenchError::AcceleratorBuild {
            device: device.name.clone(),
            log: "built without the `opencl` feature".into(),
        })
    }

    /// Name of the device the program was built for.
    #[must_use]
    pub fn device_name(&self) -> &str {
        &self.device
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_device() -> DeviceInfo {
        DeviceInfo {
            index: 1,
            name: "Example GPU".into(),
            vendor: "Example Corp".into(),
            kind: DeviceKind::Gpu,
            compute_units: 24,
            global_mem_bytes: 4 * 1024 * 1024 * 1024,
            version: "OpenCL 3.0".into(),
        }
    }

    #[test]
    fn test_diagnostics_report() {
        let mut out = Vec::new();
        print_diagnostics(&sample_device(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("Device 1: Example GPU\n"));
        assert!(text.contains("Vendor:          Example Corp"));
        assert!(text.contains("Type:            GPU"));
        assert!(text.contains("Compute units:   24"));
        assert!(text.contains("Global memory:   4096 MB"));
        assert!(text.ends_with("OpenCL 3.0\n"));
    }

    #[test]
    fn test_kernel_source_matches_host_contract() {
        assert!(CONVOLUTION_KERNEL_SOURCE.contains("__kernel void convolve("));
        assert!(CONVOLUTION_KERNEL_SOURCE.contains("(yOut + r) * nInWidth + xOut"));
        assert!(CONVOLUTION_KERNEL_SOURCE.contains("pFilter[r * nFilterWidth + c]"));
    }

    #[test]
    #[cfg(not(feature = "opencl"))]
    fn test_no_runtime_no_devices() {
        assert!(enumerate_devices().is_empty());
        let err = AcceleratorProgram::build(&sample_device(), CONVOLUTION_KERNEL_SOURCE)
            .unwrap_err();
        assert!(matches!(
            err,
            ConvBenchError::AcceleratorBuild { ref device, .. } if device == "Example GPU"
        ));
    }
}

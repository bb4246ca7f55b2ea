use crate::error::CheckVk;

use vulkanalia::prelude::v1_0::*;
use anyhow::{anyhow, Result};
use log::*;

/// The device operations the allocator relies on.
pub trait MemoryDevice {
    fn allocate_block(
        &self,
        info: &vk::MemoryAllocateInfo,
    ) -> Result<vk::DeviceMemory, vk::ErrorCode>;

    /// # Safety
    ///
    /// The memory must be alive, freed only once, and no longer
    /// in use by the GPU.
    unsafe fn free_block(&self, memory: vk::DeviceMemory);
}

impl MemoryDevice for Device {
    fn allocate_block(
        &self,
        info: &vk::MemoryAllocateInfo,
    ) -> Result<vk::DeviceMemory, vk::ErrorCode> {
        unsafe { self.allocate_memory(info, None) }
    }

    unsafe fn free_block(&self, memory: vk::DeviceMemory) {
        self.free_memory(memory, None)
    }
}

/// How a memory resource will be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryUse {
    /// Resource that is only used by the GPU. Corresponds to
    /// the `DEVICE_LOCAL` flag.
    GpuOnly,
    /// Resource that is uploaded from the CPU to the GPU.
    /// Corresponds to `HOST_VISIBLE | HOST_COHERENT`.
    CpuToGpu,
}

impl MemoryUse {
    fn properties(self) -> vk::MemoryPropertyFlags {
        // Host-visible memory has to be coherent too, so that
        // writes from the CPU are seen by the GPU without
        // explicit flushes.
        match self {
            MemoryUse::GpuOnly => vk::MemoryPropertyFlags::DEVICE_LOCAL,
            MemoryUse::CpuToGpu => vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT,
        }
    }
}

/// One Vulkan memory type of the device.
#[derive(Debug, Clone, Copy)]
pub struct MemoryRegion {
    /// Index of the memory type of the region.
    pub memory_type: u32,
    /// Properties of the memory type of the region.
    pub properties: vk::MemoryPropertyFlags,
}

/// A dedicated memory allocation handed out by the allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub memory: vk::DeviceMemory,
    pub size: u64,
    pub memory_type: u32,
}

/// Memory allocator context of the device. It is created right
/// after the logical device, lives as long as it, and releases
/// whatever it still owns when destroyed.
#[derive(Debug)]
pub struct Allocator {
    regions: Vec<MemoryRegion>,
    allocations: Vec<Allocation>,
}

impl Allocator {
    pub fn new(instance: &Instance, physical_device: vk::PhysicalDevice) -> Self {
        let properties = unsafe {
            instance.get_physical_device_memory_properties(physical_device)
        };

        // The memory types array has a fixed size; only the
        // first `memory_type_count` entries are filled. Each one
        // becomes a region keeping its index and property flags.
        let regions = properties.memory_types[..properties.memory_type_count as usize]
            .iter()
            .enumerate()
            .map(|(index, memory)| MemoryRegion {
                memory_type: index as u32,
                properties: memory.property_flags,
            })
            .collect::<Vec<_>>();

        info!("Memory allocator created ({} memory types).", regions.len());
        Self::from_regions(regions)
    }

    pub fn from_regions(regions: Vec<MemoryRegion>) -> Self {
        Self { regions, allocations: Vec::new() }
    }

    /// Finds a memory type allowed by the requirements whose
    /// properties contain those requested by the usage.
    pub fn find_memory_type(
        &self,
        requirements: vk::MemoryRequirements,
        usage: MemoryUse,
    ) -> Option<u32> {
        let properties = usage.properties();

        // The "memory type bits" of the requirements has a bit
        // set at the index of every acceptable memory type.
        self.regions
            .iter()
            .find(|region| {
                requirements.memory_type_bits & (1 << region.memory_type) != 0
                    && region.properties.contains(properties)
            })
            .map(|region| region.memory_type)
    }

    /// Allocates a dedicated memory object fitting the
    /// requirements. The allocator keeps track of it until it is
    /// freed or the allocator is destroyed.
    pub fn allocate<D: MemoryDevice>(
        &mut self,
        device: &D,
        requirements: vk::MemoryRequirements,
        usage: MemoryUse,
    ) -> Result<Allocation> {
        let memory_type = self
            .find_memory_type(requirements, usage)
            .ok_or_else(|| anyhow!("Failed to find suitable memory type for {usage:?}."))?;

        let info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type);

        let memory = device.allocate_block(&info).check("vkAllocateMemory")?;

        let allocation = Allocation {
            memory,
            size: requirements.size,
            memory_type,
        };
        self.allocations.push(allocation);

        debug!("Allocated {} bytes from memory type {memory_type}.", requirements.size);
        Ok(allocation)
    }

    /// Frees an allocation handed out by this allocator. Unknown
    /// allocations are ignored.
    ///
    /// # Safety
    ///
    /// The memory must no longer be in use by the GPU.
    pub unsafe fn free<D: MemoryDevice>(&mut self, device: &D, allocation: Allocation) {
        if let Some(position) = self.allocations.iter().position(|a| *a == allocation) {
            self.allocations.swap_remove(position);
            device.free_block(allocation.memory);
        } else {
            warn!("Ignoring free of unknown allocation {:?}.", allocation.memory);
        }
    }

    /// Frees every allocation still owned by the allocator.
    ///
    /// # Safety
    ///
    /// None of the owned memory may still be in use by the GPU.
    pub unsafe fn destroy<D: MemoryDevice>(&mut self, device: &D) {
        for allocation in self.allocations.drain(..) {
            device.free_block(allocation.memory);
        }

        info!("Memory allocator destroyed.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use vulkanalia::vk::Handle;

    #[derive(Default)]
    struct MockMemory {
        allocated: RefCell<Vec<vk::DeviceMemory>>,
        freed: RefCell<Vec<vk::DeviceMemory>>,
    }

    impl MemoryDevice for MockMemory {
        fn allocate_block(
            &self,
            _: &vk::MemoryAllocateInfo,
        ) -> Result<vk::DeviceMemory, vk::ErrorCode> {
            let mut allocated = self.allocated.borrow_mut();
            let memory = vk::DeviceMemory::from_raw(allocated.len() as u64 + 1);
            allocated.push(memory);
            Ok(memory)
        }

        unsafe fn free_block(&self, memory: vk::DeviceMemory) {
            self.freed.borrow_mut().push(memory);
        }
    }

    fn allocator() -> Allocator {
        Allocator::from_regions(vec![
            MemoryRegion {
                memory_type: 0,
                properties: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            },
            MemoryRegion {
                memory_type: 1,
                properties: vk::MemoryPropertyFlags::HOST_VISIBLE
                    | vk::MemoryPropertyFlags::HOST_COHERENT,
            },
            MemoryRegion {
                memory_type: 2,
                properties: vk::MemoryPropertyFlags::DEVICE_LOCAL
                    | vk::MemoryPropertyFlags::HOST_VISIBLE
                    | vk::MemoryPropertyFlags::HOST_COHERENT,
            },
        ])
    }

    fn requirements(memory_type_bits: u32) -> vk::MemoryRequirements {
        vk::MemoryRequirements {
            size: 256,
            alignment: 16,
            memory_type_bits,
        }
    }

    #[test]
    fn picks_first_matching_memory_type() {
        let allocator = allocator();
        assert_eq!(allocator.find_memory_type(requirements(0b111), MemoryUse::GpuOnly), Some(0));
        assert_eq!(allocator.find_memory_type(requirements(0b111), MemoryUse::CpuToGpu), Some(1));
    }

    #[test]
    fn respects_the_memory_type_bits() {
        let allocator = allocator();
        assert_eq!(allocator.find_memory_type(requirements(0b100), MemoryUse::GpuOnly), Some(2));
        assert_eq!(allocator.find_memory_type(requirements(0b001), MemoryUse::CpuToGpu), None);
    }

    #[test]
    fn allocations_use_the_selected_memory_type() {
        let device = MockMemory::default();
        let mut allocator = allocator();

        let allocation = allocator.allocate(&device, requirements(0b110), MemoryUse::GpuOnly).unwrap();
        assert_eq!(allocation.memory_type, 2);
        assert_eq!(allocation.size, 256);

        unsafe { allocator.destroy(&device) };
    }

    #[test]
    fn destroy_frees_every_owned_allocation_once() {
        let device = MockMemory::default();
        let mut allocator = allocator();

        let a = allocator.allocate(&device, requirements(0b111), MemoryUse::GpuOnly).unwrap();
        let b = allocator.allocate(&device, requirements(0b111), MemoryUse::CpuToGpu).unwrap();
        let c = allocator.allocate(&device, requirements(0b111), MemoryUse::GpuOnly).unwrap();

        unsafe {
            allocator.free(&device, b);
            allocator.destroy(&device);
            allocator.destroy(&device);
        }

        let mut freed = device.freed.borrow().clone();
        freed.sort_by_key(|m| m.as_raw());
        assert_eq!(freed, vec![a.memory, b.memory, c.memory]);
    }

    #[test]
    fn unknown_allocations_are_not_freed() {
        let device = MockMemory::default();
        let mut allocator = allocator();
        let allocation = allocator.allocate(&device, requirements(0b111), MemoryUse::GpuOnly).unwrap();

        unsafe {
            allocator.free(&device, allocation);
            allocator.free(&device, allocation);
            allocator.free(&device, Allocation {
                memory: vk::DeviceMemory::from_raw(42),
                size: 16,
                memory_type: 0,
            });
        }

        assert_eq!(*device.freed.borrow(), vec![allocation.memory]);
    }

    #[test]
    fn unsatisfiable_requirements_allocate_nothing() {
        let device = MockMemory::default();
        let mut allocator = allocator();

        assert!(allocator.allocate(&device, requirements(0b001), MemoryUse::CpuToGpu).is_err());
        assert!(device.allocated.borrow().is_empty());
    }
}

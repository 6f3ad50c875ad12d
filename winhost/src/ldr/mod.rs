//! Image Loader
//!
//! Takes the bytes of a 64-bit PE image and produces a mapped image
//! ready for execution: sections copied to their virtual addresses,
//! base relocations applied when the preferred base was unavailable,
//! the import address table bound to host functions through the export
//! resolver, TLS prepared, and section protections applied. Control
//! transfers to the entry point in the Microsoft x64 convention; the
//! return value is the process exit code.
//!
//! Partial loads are never observable: the mapping is released on any
//! failure before `load` returns.

pub mod pe;

use crate::exports::{self, ImportName};
use crate::ke::tls;
use crate::mm;
use crate::status::HostError;
use self::pe::*;
use std::os::raw::c_void;
use std::sync::RwLock;
use thiserror::Error;

/// TLS callback attach reason.
const DLL_PROCESS_ATTACH: u32 = 1;

/// Why a load failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// Input bytes are not a well-formed 64-bit PE image.
    #[error("malformed image: {0}")]
    Malformed(String),
    /// A machine type other than x64.
    #[error("unsupported machine {0:#06x}")]
    UnsupportedMachine(u16),
    /// A subsystem other than console or GUI.
    #[error("unsupported subsystem {0}")]
    UnsupportedSubsystem(u16),
    /// An imported symbol has no host implementation.
    #[error("unresolved import {dll}!{symbol}")]
    ImportUnresolved { dll: String, symbol: String },
    /// The host refused the address space.
    #[error("allocation denied")]
    AllocationDenied,
}

/// Guest entry point.
type EntryFn = unsafe extern "win64" fn() -> i32;
/// TLS callback: (image base, reason, reserved).
type TlsCallback = unsafe extern "win64" fn(*mut c_void, u32, *mut c_void);

/// A mapped, bound, frozen image.
#[derive(Debug)]
pub struct LoadedImage {
    base: *mut u8,
    size: usize,
    preferred_base: u64,
    delta: i64,
    entry_rva: u32,
    subsystem: u16,
    callbacks: Vec<u64>,
    /// Exception directory (RVA, size); recorded, not interpreted.
    pub exception_directory: Option<(u32, u32)>,
}

// The image map is read-only after entry; the raw base is safe to hand
// across threads.
unsafe impl Send for LoadedImage {}
unsafe impl Sync for LoadedImage {}

impl LoadedImage {
    pub fn base(&self) -> *mut u8 {
        self.base
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn preferred_base(&self) -> u64 {
        self.preferred_base
    }

    /// Relocation displacement actually applied.
    pub fn delta(&self) -> i64 {
        self.delta
    }

    pub fn is_gui(&self) -> bool {
        self.subsystem == IMAGE_SUBSYSTEM_WINDOWS_GUI
    }

    /// Initialize the main thread's TLS, fire the TLS callbacks in
    /// directory order and transfer control to the entry point. The
    /// return value is the guest's exit code.
    pub fn run(&self) -> i32 {
        attach_thread_tls();
        for &callback in &self.callbacks {
            let callback: TlsCallback = unsafe { std::mem::transmute(callback as usize) };
            unsafe {
                callback(
                    self.base as *mut c_void,
                    DLL_PROCESS_ATTACH,
                    std::ptr::null_mut(),
                )
            };
        }
        let entry: EntryFn =
            unsafe { std::mem::transmute(self.base.add(self.entry_rva as usize)) };
        log::debug!("[LDR] transferring control to entry {entry:p}");
        unsafe { entry() }
    }
}

impl Drop for LoadedImage {
    fn drop(&mut self) {
        mm::unmap(self.base, self.size);
    }
}

// ============================================================================
// Guest TLS
// ============================================================================

struct GuestTls {
    index: u32,
    template: Vec<u8>,
    zero_fill: usize,
}

static GUEST_TLS: RwLock<Option<GuestTls>> = RwLock::new(None);

thread_local! {
    static TLS_BLOCK: std::cell::Cell<(*mut u8, usize)> =
        const { std::cell::Cell::new((std::ptr::null_mut(), 0)) };
}

/// Give the calling thread its own independently initialized copy of
/// the image's TLS template. No-op without a loaded template or when
/// already attached.
pub fn attach_thread_tls() {
    let guard = GUEST_TLS.read().unwrap();
    let Some(guest) = guard.as_ref() else {
        return;
    };
    if !TLS_BLOCK.with(|b| b.get().0.is_null()) {
        return;
    }
    let mut block = guest.template.clone();
    block.resize(guest.template.len() + guest.zero_fill, 0);
    let len = block.len().max(1);
    block.resize(len, 0);
    let raw = Box::into_raw(block.into_boxed_slice()) as *mut u8;
    tls::set(guest.index, raw as *mut c_void);
    TLS_BLOCK.with(|b| b.set((raw, len)));
}

/// Release the calling thread's TLS block.
pub fn detach_thread_tls() {
    let (raw, len) = TLS_BLOCK.with(|b| b.replace((std::ptr::null_mut(), 0)));
    if raw.is_null() {
        return;
    }
    if let Some(guest) = GUEST_TLS.read().unwrap().as_ref() {
        tls::set(guest.index, std::ptr::null_mut());
    }
    unsafe {
        drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(raw, len)));
    }
}

// ============================================================================
// Loading
// ============================================================================

fn malformed(what: &str) -> LoadError {
    LoadError::Malformed(what.to_string())
}

/// Map, relocate, bind and freeze an image.
pub fn load(bytes: &[u8]) -> Result<LoadedImage, LoadError> {
    // 1. DOS stub and PE signature.
    let dos: ImageDosHeader = read_at(bytes, 0).ok_or_else(|| malformed("DOS header"))?;
    if !dos.is_valid() {
        return Err(malformed("DOS signature"));
    }
    let pe_offset = dos.e_lfanew as usize;
    let signature: u32 = read_at(bytes, pe_offset).ok_or_else(|| malformed("PE offset"))?;
    if signature != IMAGE_NT_SIGNATURE {
        return Err(malformed("PE signature"));
    }

    // 2. COFF and optional headers.
    let file_header: ImageFileHeader =
        read_at(bytes, pe_offset + 4).ok_or_else(|| malformed("COFF header"))?;
    if file_header.machine != IMAGE_FILE_MACHINE_AMD64 {
        return Err(LoadError::UnsupportedMachine(file_header.machine));
    }
    let optional_offset = pe_offset + 4 + std::mem::size_of::<ImageFileHeader>();
    let optional: ImageOptionalHeader64 =
        read_at(bytes, optional_offset).ok_or_else(|| malformed("optional header"))?;
    if optional.magic != IMAGE_NT_OPTIONAL_HDR64_MAGIC {
        return Err(malformed("optional header magic"));
    }
    if optional.subsystem != IMAGE_SUBSYSTEM_WINDOWS_CUI
        && optional.subsystem != IMAGE_SUBSYSTEM_WINDOWS_GUI
    {
        return Err(LoadError::UnsupportedSubsystem(optional.subsystem));
    }
    let image_size = optional.size_of_image as usize;
    if image_size == 0 {
        return Err(malformed("zero image size"));
    }

    // 3. Reserve the image range, preferring the linked base.
    let preferred = optional.image_base;
    let prot_rw = libc::PROT_READ | libc::PROT_WRITE;
    let base = if preferred != 0 {
        mm::map_fixed(preferred as usize, image_size, prot_rw)
    } else {
        None
    }
    .or_else(|| mm::map_anywhere(image_size, prot_rw))
    .ok_or(LoadError::AllocationDenied)?;
    let delta = base as i64 - preferred as i64;

    // From here on the mapping is owned; any error path unmaps through
    // this guard.
    let mut image = LoadedImage {
        base,
        size: image_size,
        preferred_base: preferred,
        delta,
        entry_rva: optional.address_of_entry_point,
        subsystem: optional.subsystem,
        callbacks: Vec::new(),
        exception_directory: None,
    };

    // 4. Headers and sections into place; the anonymous mapping is
    // already zero so only raw bytes are copied.
    let headers_len = (optional.size_of_headers as usize).min(bytes.len()).min(image_size);
    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), base, headers_len);
    }
    let section_table = optional_offset + file_header.size_of_optional_header as usize;
    let mut sections = Vec::new();
    for i in 0..file_header.number_of_sections as usize {
        let header: ImageSectionHeader = read_at(
            bytes,
            section_table + i * std::mem::size_of::<ImageSectionHeader>(),
        )
        .ok_or_else(|| malformed("section table"))?;
        let va = header.virtual_address as usize;
        let vsize = header.virtual_size as usize;
        let raw = header.pointer_to_raw_data as usize;
        let raw_size = (header.size_of_raw_data as usize).min(vsize);
        if va.checked_add(vsize).map_or(true, |end| end > image_size) {
            return Err(malformed("section exceeds image"));
        }
        if raw_size > 0 {
            if raw.checked_add(raw_size).map_or(true, |end| end > bytes.len()) {
                return Err(malformed("section exceeds file"));
            }
            unsafe {
                std::ptr::copy_nonoverlapping(bytes.as_ptr().add(raw), base.add(va), raw_size);
            }
        }
        sections.push(header);
    }

    // 5. Base relocations when displaced.
    let reloc_dir = optional.data_directory[IMAGE_DIRECTORY_ENTRY_BASERELOC];
    if delta != 0 && reloc_dir.is_present() {
        apply_relocations(&image, &reloc_dir, delta)?;
    } else if delta != 0 && !reloc_dir.is_present() {
        return Err(malformed("image displaced without relocations"));
    }

    // 6. Import binding.
    let import_dir = optional.data_directory[IMAGE_DIRECTORY_ENTRY_IMPORT];
    if import_dir.is_present() {
        bind_imports(&image, &import_dir)?;
    }

    // 7. TLS.
    let tls_dir = optional.data_directory[IMAGE_DIRECTORY_ENTRY_TLS];
    if tls_dir.is_present() {
        prepare_tls(&mut image, &tls_dir)?;
    }

    // 8. Section protections; headers become read-only.
    mm::protect(base, headers_len.max(1), libc::PROT_READ);
    for header in &sections {
        let flags = header.flags();
        let mut prot = 0;
        if flags.contains(SectionFlags::MEM_READ) {
            prot |= libc::PROT_READ;
        }
        if flags.contains(SectionFlags::MEM_WRITE) {
            prot |= libc::PROT_WRITE;
        }
        if flags.contains(SectionFlags::MEM_EXECUTE) {
            prot |= libc::PROT_EXEC;
        }
        let va = header.virtual_address as usize & !0xFFF;
        let len = header.virtual_size as usize + (header.virtual_address as usize - va);
        unsafe {
            mm::protect(base.add(va), len, prot);
        }
    }

    image.exception_directory = {
        let dir = optional.data_directory[IMAGE_DIRECTORY_ENTRY_EXCEPTION];
        dir.is_present().then_some((dir.virtual_address, dir.size))
    };

    log::info!(
        "[LDR] image mapped at {base:p} (preferred {preferred:#x}, delta {delta:#x}), entry RVA {:#x}",
        image.entry_rva
    );
    Ok(image)
}

/// In-image byte slice accessors over the mapped range.
unsafe fn image_slice(image: &LoadedImage, rva: u32, len: usize) -> Result<&[u8], LoadError> {
    let rva = rva as usize;
    if rva.checked_add(len).map_or(true, |end| end > image.size) {
        return Err(malformed("directory exceeds image"));
    }
    Ok(std::slice::from_raw_parts(image.base.add(rva), len))
}

fn apply_relocations(
    image: &LoadedImage,
    dir: &ImageDataDirectory,
    delta: i64,
) -> Result<(), LoadError> {
    let mut cursor = 0usize;
    let dir_bytes = unsafe { image_slice(image, dir.virtual_address, dir.size as usize)? };
    while cursor + 8 <= dir_bytes.len() {
        let block: ImageBaseRelocation =
            read_at(dir_bytes, cursor).ok_or_else(|| malformed("relocation block"))?;
        if block.size_of_block < 8 || cursor + block.size_of_block as usize > dir_bytes.len() {
            return Err(malformed("relocation block size"));
        }
        for i in 0..block.entry_count() {
            let entry: u16 = read_at(dir_bytes, cursor + 8 + i * 2)
                .ok_or_else(|| malformed("relocation entry"))?;
            let offset = reloc_offset(entry) as usize;
            match reloc_type(entry) {
                IMAGE_REL_BASED_ABSOLUTE => {}
                IMAGE_REL_BASED_DIR64 => {
                    let rva = block.virtual_address as usize + offset;
                    if rva + 8 > image.size {
                        log::error!("[LDR] relocation at RVA {rva:#x} outside image");
                        return Err(malformed("relocation target"));
                    }
                    unsafe {
                        let site = image.base.add(rva) as *mut u64;
                        let value = site.read_unaligned();
                        site.write_unaligned(value.wrapping_add(delta as u64));
                    }
                }
                other => {
                    log::error!(
                        "[LDR] relocation type {other} at block RVA {:#x}",
                        block.virtual_address
                    );
                    return Err(malformed("relocation type"));
                }
            }
        }
        cursor += block.size_of_block as usize;
    }
    Ok(())
}

fn bind_imports(image: &LoadedImage, dir: &ImageDataDirectory) -> Result<(), LoadError> {
    let table = exports::table();
    let mut descriptor_rva = dir.virtual_address;
    loop {
        let raw = unsafe {
            image_slice(
                image,
                descriptor_rva,
                std::mem::size_of::<ImageImportDescriptor>(),
            )?
        };
        let descriptor: ImageImportDescriptor =
            read_at(raw, 0).ok_or_else(|| malformed("import descriptor"))?;
        if descriptor.is_null() {
            break;
        }
        let dll = read_image_cstr(image, descriptor.name)?.to_string();
        // The lookup table names the imports; the address table receives
        // the bound pointers. Unbound images may share one table.
        let lookup_rva = if descriptor.original_first_thunk != 0 {
            descriptor.original_first_thunk
        } else {
            descriptor.first_thunk
        };
        let mut slot = 0u32;
        loop {
            let lookup: u64 = {
                let raw = unsafe { image_slice(image, lookup_rva + slot * 8, 8)? };
                read_at(raw, 0).ok_or_else(|| malformed("import thunk"))?
            };
            if lookup == 0 {
                break;
            }
            let (import, shown) = if lookup & IMAGE_ORDINAL_FLAG64 != 0 {
                let ordinal = (lookup & 0xFFFF) as u16;
                (ImportName::Ordinal(ordinal), format!("#{ordinal}"))
            } else {
                let name = read_image_cstr(image, lookup as u32 + 2)?;
                (ImportName::Name(name), name.to_string())
            };
            let export = table.resolve(&dll, &import).ok_or_else(|| {
                log::error!("[LDR] unresolved import {dll}!{shown}");
                LoadError::ImportUnresolved {
                    dll: dll.clone(),
                    symbol: shown.clone(),
                }
            })?;
            unsafe {
                let site =
                    image.base.add((descriptor.first_thunk + slot * 8) as usize) as *mut u64;
                site.write_unaligned(export.address as u64);
            }
            log::trace!("[LDR] bound {dll}!{shown} -> {:#x}", export.address);
            slot += 1;
        }
        descriptor_rva += std::mem::size_of::<ImageImportDescriptor>() as u32;
    }
    Ok(())
}

fn read_image_cstr(image: &LoadedImage, rva: u32) -> Result<&str, LoadError> {
    let max = (image.size - (rva as usize).min(image.size)).min(512);
    let bytes = unsafe { image_slice(image, rva, max)? };
    read_cstr(bytes, 0).ok_or_else(|| malformed("string in image"))
}

fn prepare_tls(image: &mut LoadedImage, dir: &ImageDataDirectory) -> Result<(), LoadError> {
    let raw = unsafe {
        image_slice(
            image,
            dir.virtual_address,
            std::mem::size_of::<ImageTlsDirectory64>(),
        )?
    };
    let tls_dir: ImageTlsDirectory64 = read_at(raw, 0).ok_or_else(|| malformed("TLS directory"))?;

    // Address fields are virtual addresses, already displaced by the
    // relocation pass.
    let base = image.base as u64;
    let to_rva = |va: u64| -> Result<u32, LoadError> {
        va.checked_sub(base)
            .filter(|&rva| rva < image.size as u64)
            .map(|rva| rva as u32)
            .ok_or_else(|| malformed("TLS address outside image"))
    };

    let template = if tls_dir.end_address_of_raw_data > tls_dir.start_address_of_raw_data {
        let start = to_rva(tls_dir.start_address_of_raw_data)?;
        let len = (tls_dir.end_address_of_raw_data - tls_dir.start_address_of_raw_data) as usize;
        unsafe { image_slice(image, start, len)? }.to_vec()
    } else {
        Vec::new()
    };

    let index = tls::alloc().ok_or_else(|| malformed("TLS slot pool exhausted"))?;
    if tls_dir.address_of_index != 0 {
        let index_rva = to_rva(tls_dir.address_of_index)?;
        unsafe {
            (image.base.add(index_rva as usize) as *mut u32).write_unaligned(index);
        }
    }

    let mut callbacks = Vec::new();
    if tls_dir.address_of_callbacks != 0 {
        let mut rva = to_rva(tls_dir.address_of_callbacks)?;
        loop {
            let entry: u64 = {
                let raw = unsafe { image_slice(image, rva, 8)? };
                read_at(raw, 0).ok_or_else(|| malformed("TLS callback entry"))?
            };
            if entry == 0 {
                break;
            }
            // Callback entries are virtual addresses too.
            to_rva(entry)?;
            callbacks.push(entry);
            rva += 8;
        }
    }

    *GUEST_TLS.write().unwrap() = Some(GuestTls {
        index,
        template,
        zero_fill: tls_dir.size_of_zero_fill as usize,
    });
    image.callbacks = callbacks;
    log::debug!(
        "[LDR] TLS ready: index {index}, template {} bytes, {} callback(s)",
        GUEST_TLS.read().unwrap().as_ref().map_or(0, |t| t.template.len()),
        image.callbacks.len()
    );
    Ok(())
}

/// Map a load failure onto the documented process exit codes.
pub fn exit_code_for(error: &LoadError) -> i32 {
    match error {
        LoadError::Malformed(_) => 101,
        LoadError::UnsupportedMachine(_) | LoadError::UnsupportedSubsystem(_) => 102,
        LoadError::ImportUnresolved { .. } => 103,
        LoadError::AllocationDenied => 104,
    }
}

impl From<LoadError> for HostError {
    fn from(e: LoadError) -> Self {
        match e {
            LoadError::Malformed(m) => HostError::MalformedInput(m),
            LoadError::UnsupportedMachine(m) => HostError::Unsupported(format!("machine {m:#x}")),
            LoadError::UnsupportedSubsystem(s) => {
                HostError::Unsupported(format!("subsystem {s}"))
            }
            LoadError::ImportUnresolved { dll, symbol } => {
                HostError::ProtocolViolation(format!("unresolved import {dll}!{symbol}"))
            }
            LoadError::AllocationDenied => HostError::ResourceExhausted("image range".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytemuck::{bytes_of, Zeroable};

    const TEXT_RVA: u32 = 0x1000;
    const RDATA_RVA: u32 = 0x2000;
    const DATA_RVA: u32 = 0x3000;
    const RELOC_RVA: u32 = 0x4000;
    const IMAGE_SIZE: u32 = 0x5000;

    struct TestImage {
        image_base: u64,
        entry_rva: u32,
        text: Vec<u8>,
        rdata: Vec<u8>,
        data: Vec<u8>,
        reloc_sites: Vec<u32>,
        import_dir: Option<(u32, u32)>,
        tls_dir: Option<u32>,
    }

    impl TestImage {
        fn new(image_base: u64) -> Self {
            Self {
                image_base,
                entry_rva: TEXT_RVA,
                text: vec![0xC3],
                rdata: Vec::new(),
                data: Vec::new(),
                reloc_sites: Vec::new(),
                import_dir: None,
                tls_dir: None,
            }
        }

        fn build(&self) -> Vec<u8> {
            let mut reloc = Vec::new();
            if !self.reloc_sites.is_empty() {
                // One page per site keeps the builder simple.
                for &site in &self.reloc_sites {
                    let page = site & !0xFFF;
                    reloc.extend_from_slice(&page.to_le_bytes());
                    reloc.extend_from_slice(&12u32.to_le_bytes());
                    let entry = (IMAGE_REL_BASED_DIR64 << 12) | (site & 0xFFF) as u16;
                    reloc.extend_from_slice(&entry.to_le_bytes());
                    reloc.extend_from_slice(&0u16.to_le_bytes()); // pad
                }
            }

            let mut optional = ImageOptionalHeader64::zeroed();
            optional.magic = IMAGE_NT_OPTIONAL_HDR64_MAGIC;
            optional.address_of_entry_point = self.entry_rva;
            optional.image_base = self.image_base;
            optional.section_alignment = 0x1000;
            optional.file_alignment = 0x200;
            optional.size_of_image = IMAGE_SIZE;
            optional.size_of_headers = 0x400;
            optional.subsystem = IMAGE_SUBSYSTEM_WINDOWS_CUI;
            optional.number_of_rva_and_sizes = 16;
            if let Some(dir) = self.import_dir {
                optional.data_directory[IMAGE_DIRECTORY_ENTRY_IMPORT] = ImageDataDirectory {
                    virtual_address: dir.0,
                    size: dir.1,
                };
            }
            if !reloc.is_empty() {
                optional.data_directory[IMAGE_DIRECTORY_ENTRY_BASERELOC] = ImageDataDirectory {
                    virtual_address: RELOC_RVA,
                    size: reloc.len() as u32,
                };
            }
            if let Some(rva) = self.tls_dir {
                optional.data_directory[IMAGE_DIRECTORY_ENTRY_TLS] = ImageDataDirectory {
                    virtual_address: rva,
                    size: std::mem::size_of::<ImageTlsDirectory64>() as u32,
                };
            }

            let mut file_header = ImageFileHeader::zeroed();
            file_header.machine = IMAGE_FILE_MACHINE_AMD64;
            file_header.number_of_sections = 4;
            file_header.size_of_optional_header =
                std::mem::size_of::<ImageOptionalHeader64>() as u16;
            file_header.characteristics = 0x0022;

            let mut dos = ImageDosHeader::zeroed();
            dos.e_magic = IMAGE_DOS_SIGNATURE;
            dos.e_lfanew = 0x80;

            let section = |name: &[u8], va: u32, raw_ptr: u32, flags: u32| {
                let mut s = ImageSectionHeader::zeroed();
                s.name[..name.len()].copy_from_slice(name);
                s.virtual_size = 0x1000;
                s.virtual_address = va;
                s.size_of_raw_data = 0x200;
                s.pointer_to_raw_data = raw_ptr;
                s.characteristics = flags;
                s
            };
            let sections = [
                section(b".text", TEXT_RVA, 0x400, 0x6000_0020),
                section(b".rdata", RDATA_RVA, 0x600, 0x4000_0040),
                section(b".data", DATA_RVA, 0x800, 0xC000_0040),
                section(b".reloc", RELOC_RVA, 0xA00, 0x4200_0040),
            ];

            let mut file = vec![0u8; 0xC00];
            file[..64].copy_from_slice(bytes_of(&dos));
            file[0x80..0x84].copy_from_slice(&IMAGE_NT_SIGNATURE.to_le_bytes());
            file[0x84..0x98].copy_from_slice(bytes_of(&file_header));
            file[0x98..0x98 + 240].copy_from_slice(bytes_of(&optional));
            let mut at = 0x98 + 240;
            for s in &sections {
                file[at..at + 40].copy_from_slice(bytes_of(s));
                at += 40;
            }
            let copy = |file: &mut Vec<u8>, offset: usize, data: &[u8]| {
                assert!(data.len() <= 0x200, "test section too large");
                file[offset..offset + data.len()].copy_from_slice(data);
            };
            copy(&mut file, 0x400, &self.text);
            copy(&mut file, 0x600, &self.rdata);
            copy(&mut file, 0x800, &self.data);
            copy(&mut file, 0xA00, &reloc);
            file
        }
    }

    #[test]
    fn test_rejects_bad_signatures() {
        assert!(matches!(load(b"junk"), Err(LoadError::Malformed(_))));
        let mut image = TestImage::new(0x1_4000_0000).build();
        image[0] = b'X';
        assert!(matches!(load(&image), Err(LoadError::Malformed(_))));
    }

    #[test]
    fn test_rejects_wrong_machine() {
        let mut image = TestImage::new(0x1_4000_0000).build();
        // Machine field of the COFF header.
        image[0x84..0x86].copy_from_slice(&0x014C_u16.to_le_bytes());
        assert!(matches!(
            load(&image),
            Err(LoadError::UnsupportedMachine(0x014C))
        ));
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn test_entry_returns_exit_code() {
        let mut spec = TestImage::new(0x1_4000_0000);
        // mov eax, 42 ; ret
        spec.text = vec![0xB8, 0x2A, 0x00, 0x00, 0x00, 0xC3];
        let image = load(&spec.build()).expect("load");
        assert_eq!(image.run(), 42);
    }

    #[test]
    fn test_relocation_round_trip() {
        // Preferred base 0 cannot be honoured, so the image is always
        // displaced and the fixup fires.
        let mut spec = TestImage::new(0);
        let site_rva = DATA_RVA;
        let original = 0x1234u64; // == preferred_base + 0x1234
        spec.data = original.to_le_bytes().to_vec();
        spec.reloc_sites = vec![site_rva];
        let image = load(&spec.build()).expect("load");
        assert_ne!(image.delta(), 0);
        let fixed = unsafe {
            (image.base().add(site_rva as usize) as *const u64).read_unaligned()
        };
        assert_eq!(fixed, original.wrapping_add(image.delta() as u64));
    }

    #[test]
    fn test_displaced_image_without_relocations_fails() {
        let spec = TestImage::new(0);
        assert!(matches!(load(&spec.build()), Err(LoadError::Malformed(_))));
    }

    fn import_rdata(dll: &str, symbol: &str) -> Vec<u8> {
        // Layout inside .rdata (RVA 0x2000):
        //   0x00 descriptor, 0x14 null descriptor, 0x30 dll name,
        //   0x40 hint/name, 0x60 lookup table, 0x70 address table.
        let mut rdata = vec![0u8; 0x80];
        let descriptor = ImageImportDescriptor {
            original_first_thunk: RDATA_RVA + 0x60,
            time_date_stamp: 0,
            forwarder_chain: 0,
            name: RDATA_RVA + 0x30,
            first_thunk: RDATA_RVA + 0x70,
        };
        rdata[..20].copy_from_slice(bytes_of(&descriptor));
        rdata[0x30..0x30 + dll.len()].copy_from_slice(dll.as_bytes());
        rdata[0x42..0x42 + symbol.len()].copy_from_slice(symbol.as_bytes());
        let hint_name = (RDATA_RVA + 0x40) as u64;
        rdata[0x60..0x68].copy_from_slice(&hint_name.to_le_bytes());
        rdata[0x70..0x78].copy_from_slice(&hint_name.to_le_bytes());
        rdata
    }

    #[test]
    fn test_unresolved_import_fails() {
        let mut spec = TestImage::new(0x1_4000_0000);
        spec.rdata = import_rdata("missing.dll", "NoSuchSymbol");
        spec.import_dir = Some((RDATA_RVA, 40));
        match load(&spec.build()) {
            Err(LoadError::ImportUnresolved { dll, symbol }) => {
                assert_eq!(dll, "missing.dll");
                assert_eq!(symbol, "NoSuchSymbol");
            }
            other => panic!("expected unresolved import, got {other:?}"),
        }
    }

    #[test]
    fn test_import_binds_nonnull_addresses() {
        let mut spec = TestImage::new(0x1_4000_0000);
        spec.rdata = import_rdata("kernel32.dll", "GetLastError");
        spec.import_dir = Some((RDATA_RVA, 40));
        let image = load(&spec.build()).expect("load");
        let bound = unsafe {
            (image.base().add((RDATA_RVA + 0x70) as usize) as *const u64).read_unaligned()
        };
        assert_ne!(bound, 0);
        assert_eq!(bound, crate::status::GetLastError as usize as u64);
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn test_entry_calls_through_bound_import() {
        let mut spec = TestImage::new(0x1_4000_0000);
        spec.rdata = import_rdata("KERNEL32.DLL", "GetLastError");
        spec.import_dir = Some((RDATA_RVA, 40));
        // call [rip + disp32] ; ret  -- the IAT slot at RVA 0x2070.
        let disp = (RDATA_RVA + 0x70) as i32 - (TEXT_RVA as i32 + 6);
        let mut text = vec![0xFF, 0x15];
        text.extend_from_slice(&disp.to_le_bytes());
        text.push(0xC3);
        spec.text = text;
        let image = load(&spec.build()).expect("load");
        crate::status::set_last_error(123);
        assert_eq!(image.run(), 123);
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn test_tls_template_and_callbacks() {
        // Preferred base 0 keeps every VA fixup live and deterministic.
        let mut spec = TestImage::new(0);

        // .data layout: template @0, index slot @0x100, callback array
        // @0x108, counter @0x120, TLS directory @0x140.
        let mut data = vec![0u8; 0x180];
        for b in data.iter_mut().take(16) {
            *b = 0xAA;
        }
        data[0x108..0x110].copy_from_slice(&u64::from(TEXT_RVA + 0x10).to_le_bytes());
        let tls_dir = ImageTlsDirectory64 {
            start_address_of_raw_data: u64::from(DATA_RVA),
            end_address_of_raw_data: u64::from(DATA_RVA) + 16,
            address_of_index: u64::from(DATA_RVA + 0x100),
            address_of_callbacks: u64::from(DATA_RVA + 0x108),
            size_of_zero_fill: 8,
            characteristics: 0,
        };
        data[0x140..0x140 + 40].copy_from_slice(bytes_of(&tls_dir));
        spec.data = data;
        spec.tls_dir = Some(DATA_RVA + 0x140);
        // Every VA-bearing field needs a fixup once the image moves.
        spec.reloc_sites = vec![
            DATA_RVA + 0x108, // callback array entry
            DATA_RVA + 0x140, // start
            DATA_RVA + 0x148, // end
            DATA_RVA + 0x150, // index address
            DATA_RVA + 0x158, // callback array address
        ];

        // entry: ret. callback at +0x10: inc dword [rip+disp] ; ret
        let mut text = vec![0u8; 0x20];
        text[0] = 0xC3;
        let counter_disp = (DATA_RVA + 0x120) as i32 - (TEXT_RVA as i32 + 0x10 + 6);
        text[0x10] = 0xFF;
        text[0x11] = 0x05;
        text[0x12..0x16].copy_from_slice(&counter_disp.to_le_bytes());
        text[0x16] = 0xC3;
        spec.text = text;

        let image = load(&spec.build()).expect("load");
        assert_eq!(image.run(), 0);

        // Callback fired exactly once, before entry.
        let counter = unsafe {
            (image.base().add((DATA_RVA + 0x120) as usize) as *const u32).read_unaligned()
        };
        assert_eq!(counter, 1);

        // The directory's index slot was filled and this thread got an
        // initialized block: template bytes then zero fill.
        let index = unsafe {
            (image.base().add((DATA_RVA + 0x100) as usize) as *const u32).read_unaligned()
        };
        let block = crate::ke::tls::get(index) as *const u8;
        assert!(!block.is_null());
        let bytes = unsafe { std::slice::from_raw_parts(block, 24) };
        assert!(bytes[..16].iter().all(|&b| b == 0xAA));
        assert!(bytes[16..].iter().all(|&b| b == 0));

        // A fresh thread receives its own independently initialized
        // copy.
        let base = image.base() as usize;
        std::thread::spawn(move || {
            attach_thread_tls();
            let index = unsafe { ((base + (DATA_RVA + 0x100) as usize) as *const u32).read_unaligned() };
            let block = crate::ke::tls::get(index) as *const u8;
            assert!(!block.is_null());
            let bytes = unsafe { std::slice::from_raw_parts(block, 24) };
            assert!(bytes[..16].iter().all(|&b| b == 0xAA));
            detach_thread_tls();
        })
        .join()
        .unwrap();
        detach_thread_tls();
    }
}

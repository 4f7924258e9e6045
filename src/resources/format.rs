use ash::vk;

/// Largest element this table describes: four 64-bit components
const MAX_ELEMENT_SIZE: usize = 32;

/// Per-element layout of a `vk::Format` and the bytes used to fill
/// components that a narrower source format does not provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatTraits {
    /// Bytes per element, 0 when the format is not described by this table
    pub size: u32,
    pub num_components: u32,
    /// Bytes per component, 0 for packed formats
    pub component_size: u32,
    default_value: [u8; MAX_ELEMENT_SIZE],
}

impl FormatTraits {
    const UNKNOWN: FormatTraits = FormatTraits {
        size: 0,
        num_components: 0,
        component_size: 0,
        default_value: [0; MAX_ELEMENT_SIZE],
    };

    fn components(kind: ComponentKind, num_components: u32) -> Self {
        let one = kind.one();
        let component_size = one.len();
        let size = component_size * num_components as usize;

        let mut default_value = [0; MAX_ELEMENT_SIZE];
        for chunk in default_value[..size].chunks_exact_mut(component_size) {
            chunk.copy_from_slice(one);
        }

        Self {
            size: size as u32,
            num_components,
            component_size: component_size as u32,
            default_value,
        }
    }

    fn packed(size: u32, num_components: u32) -> Self {
        Self {
            size,
            num_components,
            component_size: 0,
            default_value: [0; MAX_ELEMENT_SIZE],
        }
    }

    /// Default bytes for one whole element.
    /// Byte `i` is what a translating copy writes at byte `i` of a target element
    /// when the source element is shorter than `i + 1` bytes.
    pub fn default_value(&self) -> &[u8] {
        &self.default_value[..self.size as usize]
    }

    pub fn is_known(&self) -> bool {
        self.size != 0
    }
}

#[derive(Debug, Clone, Copy)]
enum ComponentKind {
    Unorm8,
    Snorm8,
    Int8,
    Unorm16,
    Snorm16,
    Int16,
    Sfloat16,
    Int32,
    Sfloat32,
    Sfloat64,
}

impl ComponentKind {
    /// Little-endian encoding of the component's "one": max for normalized types,
    /// 1 for integers, 1.0 for floats. Gives opaque alpha when padding colors.
    fn one(self) -> &'static [u8] {
        match self {
            ComponentKind::Unorm8 => &[0xff],
            ComponentKind::Snorm8 => &[0x7f],
            ComponentKind::Int8 => &[0x01],
            ComponentKind::Unorm16 => &[0xff, 0xff],
            ComponentKind::Snorm16 => &[0xff, 0x7f],
            ComponentKind::Int16 => &[0x01, 0x00],
            ComponentKind::Sfloat16 => &[0x00, 0x3c],
            ComponentKind::Int32 => &[0x01, 0x00, 0x00, 0x00],
            ComponentKind::Sfloat32 => &[0x00, 0x00, 0x80, 0x3f],
            ComponentKind::Sfloat64 => &[0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xf0, 0x3f],
        }
    }
}

pub fn get_format_traits(format: vk::Format) -> FormatTraits {
    use ComponentKind::*;
    use vk::Format as F;

    match format {
        F::R8_UNORM | F::R8_SRGB | F::R8_USCALED => FormatTraits::components(Unorm8, 1),
        F::R8_SNORM | F::R8_SSCALED => FormatTraits::components(Snorm8, 1),
        F::R8_UINT | F::R8_SINT | F::S8_UINT => FormatTraits::components(Int8, 1),

        F::R8G8_UNORM | F::R8G8_SRGB | F::R8G8_USCALED => FormatTraits::components(Unorm8, 2),
        F::R8G8_SNORM | F::R8G8_SSCALED => FormatTraits::components(Snorm8, 2),
        F::R8G8_UINT | F::R8G8_SINT => FormatTraits::components(Int8, 2),

        F::R8G8B8_UNORM | F::R8G8B8_SRGB | F::R8G8B8_USCALED
        | F::B8G8R8_UNORM | F::B8G8R8_SRGB | F::B8G8R8_USCALED => {
            FormatTraits::components(Unorm8, 3)
        }
        F::R8G8B8_SNORM | F::R8G8B8_SSCALED | F::B8G8R8_SNORM | F::B8G8R8_SSCALED => {
            FormatTraits::components(Snorm8, 3)
        }
        F::R8G8B8_UINT | F::R8G8B8_SINT | F::B8G8R8_UINT | F::B8G8R8_SINT => {
            FormatTraits::components(Int8, 3)
        }

        F::R8G8B8A8_UNORM | F::R8G8B8A8_SRGB | F::R8G8B8A8_USCALED
        | F::B8G8R8A8_UNORM | F::B8G8R8A8_SRGB | F::B8G8R8A8_USCALED
        | F::A8B8G8R8_UNORM_PACK32 | F::A8B8G8R8_SRGB_PACK32 | F::A8B8G8R8_USCALED_PACK32 => {
            FormatTraits::components(Unorm8, 4)
        }
        F::R8G8B8A8_SNORM | F::R8G8B8A8_SSCALED | F::B8G8R8A8_SNORM | F::B8G8R8A8_SSCALED
        | F::A8B8G8R8_SNORM_PACK32 | F::A8B8G8R8_SSCALED_PACK32 => {
            FormatTraits::components(Snorm8, 4)
        }
        F::R8G8B8A8_UINT | F::R8G8B8A8_SINT | F::B8G8R8A8_UINT | F::B8G8R8A8_SINT
        | F::A8B8G8R8_UINT_PACK32 | F::A8B8G8R8_SINT_PACK32 => FormatTraits::components(Int8, 4),

        F::R16_UNORM | F::R16_USCALED | F::D16_UNORM => FormatTraits::components(Unorm16, 1),
        F::R16_SNORM | F::R16_SSCALED => FormatTraits::components(Snorm16, 1),
        F::R16_UINT | F::R16_SINT => FormatTraits::components(Int16, 1),
        F::R16_SFLOAT => FormatTraits::components(Sfloat16, 1),

        F::R16G16_UNORM | F::R16G16_USCALED => FormatTraits::components(Unorm16, 2),
        F::R16G16_SNORM | F::R16G16_SSCALED => FormatTraits::components(Snorm16, 2),
        F::R16G16_UINT | F::R16G16_SINT => FormatTraits::components(Int16, 2),
        F::R16G16_SFLOAT => FormatTraits::components(Sfloat16, 2),

        F::R16G16B16_UNORM | F::R16G16B16_USCALED => FormatTraits::components(Unorm16, 3),
        F::R16G16B16_SNORM | F::R16G16B16_SSCALED => FormatTraits::components(Snorm16, 3),
        F::R16G16B16_UINT | F::R16G16B16_SINT => FormatTraits::components(Int16, 3),
        F::R16G16B16_SFLOAT => FormatTraits::components(Sfloat16, 3),

        F::R16G16B16A16_UNORM | F::R16G16B16A16_USCALED => FormatTraits::components(Unorm16, 4),
        F::R16G16B16A16_SNORM | F::R16G16B16A16_SSCALED => FormatTraits::components(Snorm16, 4),
        F::R16G16B16A16_UINT | F::R16G16B16A16_SINT => FormatTraits::components(Int16, 4),
        F::R16G16B16A16_SFLOAT => FormatTraits::components(Sfloat16, 4),

        F::R32_UINT | F::R32_SINT => FormatTraits::components(Int32, 1),
        F::R32_SFLOAT | F::D32_SFLOAT => FormatTraits::components(Sfloat32, 1),
        F::R32G32_UINT | F::R32G32_SINT => FormatTraits::components(Int32, 2),
        F::R32G32_SFLOAT => FormatTraits::components(Sfloat32, 2),
        F::R32G32B32_UINT | F::R32G32B32_SINT => FormatTraits::components(Int32, 3),
        F::R32G32B32_SFLOAT => FormatTraits::components(Sfloat32, 3),
        F::R32G32B32A32_UINT | F::R32G32B32A32_SINT => FormatTraits::components(Int32, 4),
        F::R32G32B32A32_SFLOAT => FormatTraits::components(Sfloat32, 4),

        F::R64_SFLOAT => FormatTraits::components(Sfloat64, 1),
        F::R64G64_SFLOAT => FormatTraits::components(Sfloat64, 2),
        F::R64G64B64_SFLOAT => FormatTraits::components(Sfloat64, 3),
        F::R64G64B64A64_SFLOAT => FormatTraits::components(Sfloat64, 4),

        F::R4G4_UNORM_PACK8 => FormatTraits::packed(1, 2),
        F::R5G6B5_UNORM_PACK16 | F::B5G6R5_UNORM_PACK16 => FormatTraits::packed(2, 3),
        F::R4G4B4A4_UNORM_PACK16 | F::B4G4R4A4_UNORM_PACK16
        | F::R5G5B5A1_UNORM_PACK16 | F::B5G5R5A1_UNORM_PACK16
        | F::A1R5G5B5_UNORM_PACK16 => FormatTraits::packed(2, 4),
        F::A2R10G10B10_UNORM_PACK32 | F::A2B10G10R10_UNORM_PACK32
        | F::A2R10G10B10_UINT_PACK32 | F::A2B10G10R10_UINT_PACK32 => FormatTraits::packed(4, 4),
        F::B10G11R11_UFLOAT_PACK32 => FormatTraits::packed(4, 3),
        F::X8_D24_UNORM_PACK32 | F::D24_UNORM_S8_UINT => FormatTraits::packed(4, 2),

        _ => FormatTraits::UNKNOWN,
    }
}

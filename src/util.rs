use ash::vk;

/// Rounds `current` up to the next multiple of `alignment`
pub fn align(current: vk::DeviceSize, alignment: vk::DeviceSize) -> vk::DeviceSize {
    if alignment == 0 || current % alignment == 0 {
        current
    } else {
        let remainder = current % alignment;
        current + alignment - remainder
    }
}

/// Smallest boundary that is a multiple of both `a` and `b`
pub fn lcm(a: vk::DeviceSize, b: vk::DeviceSize) -> vk::DeviceSize {
    fn gcd(mut a: vk::DeviceSize, mut b: vk::DeviceSize) -> vk::DeviceSize {
        while b != 0 {
            (a, b) = (b, a % b);
        }
        a
    }

    if a == 0 || b == 0 {
        a.max(b)
    } else {
        a / gcd(a, b) * b
    }
}

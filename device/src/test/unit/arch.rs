use test_case::test_case;

use crate::DeviceSpec;

#[test_case("cpu", DeviceSpec::Cpu)]
#[test_case("CUDA", DeviceSpec::Cuda { device_id: 0 })]
#[test_case("cuda:2", DeviceSpec::Cuda { device_id: 2 })]
#[test_case("metal:1", DeviceSpec::Metal { device_id: 1 })]
#[test_case("vulkan", DeviceSpec::Vulkan)]
fn test_parse(input: &str, expected: DeviceSpec) {
    assert_eq!(input.parse::<DeviceSpec>().unwrap(), expected);
}

#[test_case("tpu")]
#[test_case("cuda:x")]
fn test_parse_rejects(input: &str) {
    assert!(input.parse::<DeviceSpec>().is_err());
}

#[test]
fn test_reachability() {
    let cuda0 = DeviceSpec::Cuda { device_id: 0 };
    assert!(DeviceSpec::Cpu.is_reachable_from(&cuda0));
    assert!(cuda0.is_reachable_from(&cuda0));
    assert!(!cuda0.is_reachable_from(&DeviceSpec::Cpu));
    assert!(!cuda0.is_reachable_from(&DeviceSpec::Cuda { device_id: 1 }));
}

// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for configuration module

use qcap_source::backends::capture::{DisplayPortMstMode, Sdi12gMode};
use qcap_source::{ConfigError, InputType, PixelFormat, SourceConfig};

#[test]
fn test_config_default() {
    let config = SourceConfig::default();

    assert_eq!(config.device, "SC0710 PCI");
    assert_eq!(config.channel, 0);
    assert_eq!((config.width, config.height), (3840, 2160));
    assert_eq!(config.framerate, 60);
    assert!(!config.rdma, "RDMA should be off by default");
    assert_eq!(
        config.pixel_format,
        PixelFormat::Bgr24,
        "BGR24 should be the default raw format"
    );
    assert_eq!(config.input_type, InputType::Auto);
    assert_eq!(config.mst_mode, DisplayPortMstMode::Sst);
    assert_eq!(config.sdi12g_mode, Sdi12gMode::Default);
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_json_round_trip() {
    let config = SourceConfig {
        channel: 3,
        rdma: true,
        pixel_format: PixelFormat::Nv12,
        input_type: InputType::DisplayPort,
        mst_mode: DisplayPortMstMode::Mst,
        ..Default::default()
    };

    let json = config.to_json_string().unwrap();
    assert!(json.contains("\"nv12\""), "selectors serialize lowercase");
    assert!(json.contains("\"dp\""));
    assert_eq!(SourceConfig::from_json_str(&json).unwrap(), config);
}

#[test]
fn test_unknown_selector_is_rejected() {
    // Unknown values are errors, never a silent fallback to BGR24
    let err = SourceConfig::from_json_str(r#"{ "pixel_format": "rgb565" }"#).unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)), "got {:?}", err);

    let err = SourceConfig::from_json_str(r#"{ "input_type": "vga" }"#).unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)), "got {:?}", err);
}

#[test]
fn test_selector_strings_parse() {
    assert_eq!("YUY2".parse::<PixelFormat>(), Ok(PixelFormat::Yuy2));
    assert_eq!("y210".parse::<PixelFormat>(), Ok(PixelFormat::Y210));
    assert_eq!("hdmi".parse::<InputType>(), Ok(InputType::Hdmi));
    assert_eq!(
        "bgr32".parse::<PixelFormat>(),
        Err(ConfigError::UnknownPixelFormat("bgr32".to_string()))
    );
}

#[test]
fn test_invalid_dimensions_rejected() {
    let config = SourceConfig {
        width: 0,
        ..Default::default()
    };
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidValue(_))
    ));

    let err = SourceConfig::from_json_str(r#"{ "device": "  " }"#).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue(_)));
}

#[test]
fn test_quad_link_needs_rdma() {
    let mut config = SourceConfig {
        sdi12g_mode: Sdi12gMode::QuadLink,
        ..Default::default()
    };
    assert!(!config.quad_link(), "host copies are single-link only");
    config.rdma = true;
    assert!(config.quad_link());
}

pub const YOLO_MODEL_NAME: &str = "yolo11n-pose_widerface.onnx";
pub const YOLO_MODEL_URL: &str =
    "https://github.com/neutrinographics/faceguard/releases/download/v0.1.0/yolo11n-pose_widerface.onnx";

/// Identity, swap and enhancement models are not redistributable, so they
/// are only looked up locally, never downloaded.
pub const EMBEDDING_MODEL_NAME: &str = "w600k_r50.onnx";
pub const SWAP_MODEL_NAME: &str = "inswapper_128_fp16.onnx";
pub const ENHANCE_MODEL_NAME: &str = "GFPGANv1.4.onnx";

/// Directory searched for models shipped next to the binary.
pub const BUNDLED_MODEL_DIR: &str = "models";

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "tif", "webp"];

pub const APP_DIR_NAME: &str = "FaceSwap Live";

pub fn is_image_path(path: &std::path::Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::path::Path;

    #[rstest]
    #[case("face.jpg", true)]
    #[case("face.PNG", true)]
    #[case("clip.mp4", false)]
    #[case("noext", false)]
    fn test_is_image_path(#[case] path: &str, #[case] expected: bool) {
        assert_eq!(is_image_path(Path::new(path)), expected);
    }
}

pub mod blend_mask;
pub mod onnx_gfpgan_enhancer;
pub mod onnx_inswapper;
pub mod tensor_image;

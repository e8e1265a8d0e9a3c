use crate::options::OcrOptions;
use crate::plane::LumaPlane;

/// OCR invocation for one prepared region.
#[derive(Debug)]
pub struct OcrRequest<'a> {
    plane: LumaPlane<'a>,
    options: &'a OcrOptions,
}

impl<'a> OcrRequest<'a> {
    pub fn new(plane: LumaPlane<'a>, options: &'a OcrOptions) -> Self {
        Self { plane, options }
    }

    pub fn plane(&self) -> &LumaPlane<'a> {
        &self.plane
    }

    pub fn options(&self) -> &'a OcrOptions {
        self.options
    }
}

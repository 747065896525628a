/// File name extension contributed by a pipeline stage, without the dot.
pub trait FileExtProvider {
    fn file_ext(&self) -> Option<&'static str>;
}

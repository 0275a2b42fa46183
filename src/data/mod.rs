pub mod assembler;
pub mod labeler;

pub use assembler::{assemble_all, ClickDataset, ClickItem, DatasetBundle, DatasetRole};
pub use labeler::{label_image, label_key, load_grayscale, one_hot_label, LabeledImage};

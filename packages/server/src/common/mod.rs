pub mod capture_view;

pub use capture_view::CaptureView;

pub mod clean_dangle_uploads;
pub mod create_upload;
pub mod read_upload;

pub use clean_dangle_uploads::{
    CleanDangleUploadsOperation, CleanDangleUploadsOperationRequest,
    CleanDangleUploadsOperationResult,
};
pub use create_upload::{
    CreateUploadOperation, CreateUploadOperationRequest, CreateUploadOperationResult,
};
pub use read_upload::{
    ReadUploadOperation, ReadUploadOperationRequest, ReadUploadOperationResult,
};

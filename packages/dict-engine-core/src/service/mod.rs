//! Schema and data façades over the registered engines.

mod data_service;
mod dict_service;

pub use data_service::DictDataService;
pub use dict_service::DictService;

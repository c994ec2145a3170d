/// 集合模块 - 请求定义、文件夹树与遍历计划
pub mod plan;
pub mod types;

pub use plan::PlannedRequest;
pub use types::{
    ApiKeyLocation, Auth, Collection, Folder, KeyValue, RequestBody, RequestDefinition,
    RequestSettings,
};

mod toolbox_store;

pub use toolbox_store::ToolboxStore;

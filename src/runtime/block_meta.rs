/// Block metadata
#[derive(Debug)]
pub struct BlockMeta {
    type_name: String,
    instance_name: Option<String>,
}

impl BlockMeta {
    fn new(type_name: String) -> BlockMeta {
        BlockMeta {
            type_name,
            instance_name: None,
        }
    }

    /// Name of block type
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Instance name
    pub fn instance_name(&self) -> Option<&str> {
        self.instance_name.as_deref()
    }

    /// Set instance name
    pub fn set_instance_name(&mut self, name: impl Into<String>) {
        self.instance_name = Some(name.into());
    }
}

/// Block metadata builder
pub struct BlockMetaBuilder {
    name: String,
}

impl BlockMetaBuilder {
    /// Create builder
    pub fn new(name: impl Into<String>) -> BlockMetaBuilder {
        BlockMetaBuilder { name: name.into() }
    }

    /// Build block metadata
    pub fn build(self) -> BlockMeta {
        BlockMeta::new(self.name)
    }
}

mod memory;
mod redis;

pub use memory::MemoryCrlRepository;
pub use self::redis::RedisCrlRepository;

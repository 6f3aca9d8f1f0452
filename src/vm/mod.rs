pub mod cursor;
pub mod executor;
pub mod frame;
pub mod iterator;
pub mod opcode;
pub mod ops;
pub mod printer;
pub mod symbols;

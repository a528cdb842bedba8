pub mod offering;
pub mod protocol;

pub use offering::PublishedOffering;
pub use protocol::{
    Close, ExchangeThread, Message, MessageBody, MessageKind, MessageMetadata, Order,
    OrderStatusUpdate, PROTOCOL_VERSION, Quote, Rfq, RfqAccepted,
};

pub mod sophie;

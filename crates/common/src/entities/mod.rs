pub mod edi_gateways;
pub mod edi_pending_exports;

pub(crate) const CFDI_33_NS: &str = "http://www.sat.gob.mx/cfd/3";
pub(crate) const CFDI_40_NS: &str = "http://www.sat.gob.mx/cfd/4";
pub(crate) const TFD_NS: &str = "http://www.sat.gob.mx/TimbreFiscalDigital";

pub(crate) const COMPROBANTE_XPATH: &str = "//cfdi:Comprobante";
pub(crate) const TIMBRE_XPATH: &str = "//tfd:TimbreFiscalDigital";

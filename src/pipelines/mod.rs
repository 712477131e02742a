pub mod trnaseq;

//! Domain models for the phenotype library server

pub mod audit;
pub mod catalogue;
pub mod concept;
pub mod ontology;
pub mod phenotype;
pub mod user;

pub use audit::RequestEvent;
pub use catalogue::{Brand, CodeEntry, CodingSystem, DataSource, Tag, TagType, Template};
pub use concept::{
    Concept, ConceptComponentView, ConceptDetail, ConceptPage, ConceptRecord, ConceptWrite,
    ExportedCode,
};
pub use ontology::{NewEdge, NodeRef, OntologyNodeView, OntologyType};
pub use phenotype::{
    NewPhenotypeVersion, Phenotype, PhenotypeDetail, PhenotypeInput, PhenotypeSummary,
    PublicationView, SearchPage, SearchRequest, UpdatePhenotypeRequest, VersionInfo,
};
pub use user::{SessionRecord, User};

//! The merged output model for one class definition.
//!
//! A [`MergedClassDefinition`] is built exactly once per input class while
//! its file is being merged and never revisited: every embedded reference
//! (supertype, interfaces, source file, member ids, annotation contents,
//! static initializers, code operands) is remapped to canonical constants
//! at construction time, so the serializer only deals in final shapes.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::constant::{AccessFlags, DexString, DexType, FieldRef, MethodRef};
use crate::file::{ClassDefItem, Parser, NO_INDEX};
use crate::merge::code::{import_code, CodeItem};
use crate::pool::Resolver;
use crate::value::{decode, AnnotationItem, EncodedValue};
use crate::Result;

/// A field row of the merged model.
#[derive(Debug, Clone)]
pub struct FieldDef {
    /// The canonical field reference.
    pub field: Arc<FieldRef>,
    /// Access flags, kept verbatim.
    pub access_flags: AccessFlags,
    /// For static fields, the positional initializer from the class's
    /// static-values array; `None` means the type default.
    pub static_value: Option<EncodedValue>,
}

/// A method row of the merged model.
#[derive(Debug, Clone)]
pub struct MethodDef {
    /// The canonical method reference.
    pub method: Arc<MethodRef>,
    /// Access flags, kept verbatim.
    pub access_flags: AccessFlags,
    /// Imported code, absent for abstract and native methods.
    pub code: Option<CodeItem>,
}

/// The merged annotation directory of one class, re-keyed by canonical
/// constants so identical members contributed by separate files collide.
#[derive(Debug, Clone, Default)]
pub struct ClassAnnotations {
    /// Annotations on the class itself.
    pub class: Vec<AnnotationItem>,
    /// Per-field annotation sets.
    pub fields: BTreeMap<Arc<FieldRef>, Vec<AnnotationItem>>,
    /// Per-method annotation sets.
    pub methods: BTreeMap<Arc<MethodRef>, Vec<AnnotationItem>>,
    /// Per-method parameter annotation lists; inner `None` marks a
    /// parameter without annotations (distinct from an empty set).
    pub parameters: BTreeMap<Arc<MethodRef>, Vec<Option<Vec<AnnotationItem>>>>,
}

impl ClassAnnotations {
    /// Whether the directory carries nothing at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.class.is_empty()
            && self.fields.is_empty()
            && self.methods.is_empty()
            && self.parameters.is_empty()
    }
}

/// One class of the merged output.
#[derive(Debug, Clone)]
pub struct MergedClassDefinition {
    /// The defined type.
    pub ty: Arc<DexType>,
    /// Class access flags.
    pub access_flags: AccessFlags,
    /// Superclass, `None` only for `java.lang.Object`.
    pub superclass: Option<Arc<DexType>>,
    /// Implemented interfaces in declaration order.
    pub interfaces: Vec<Arc<DexType>>,
    /// Source file name, if recorded.
    pub source_file: Option<Arc<DexString>>,
    /// Merged annotation directory.
    pub annotations: ClassAnnotations,
    /// Static fields in declaration order, initializers attached.
    pub static_fields: Vec<FieldDef>,
    /// Instance fields in declaration order.
    pub instance_fields: Vec<FieldDef>,
    /// Direct methods (private, static, constructors).
    pub direct_methods: Vec<MethodDef>,
    /// Virtual methods.
    pub virtual_methods: Vec<MethodDef>,
}

impl MergedClassDefinition {
    /// Build the merged record for one class_def row, remapping every
    /// embedded reference through the file's resolver.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for any inconsistency in the
    /// class's own records (member tables, annotation sets, initializers,
    /// code items).
    pub fn from_file(resolver: &mut Resolver, def: &ClassDefItem) -> Result<Self> {
        let ty = resolver.ty(def.class_idx)?;

        let superclass = if def.superclass_idx == NO_INDEX {
            None
        } else {
            Some(resolver.ty(def.superclass_idx)?)
        };

        let interfaces = if def.interfaces_off == 0 {
            Vec::new()
        } else {
            let raw = resolver.file().type_list_at(def.interfaces_off)?;
            let mut interfaces = Vec::with_capacity(raw.len());
            for type_idx in raw {
                interfaces.push(resolver.ty(u32::from(type_idx))?);
            }
            interfaces
        };

        let source_file = if def.source_file_idx == NO_INDEX {
            None
        } else {
            Some(resolver.string(def.source_file_idx)?)
        };

        let annotations = if def.annotations_off == 0 {
            ClassAnnotations::default()
        } else {
            merge_annotations(resolver, def.annotations_off)?
        };

        let static_values = if def.static_values_off == 0 {
            Vec::new()
        } else {
            let file = resolver.file();
            let mut parser = Parser::new(file.data());
            parser.seek(def.static_values_off as usize)?;
            decode::read_array(&mut parser, resolver)?
        };

        let mut static_fields = Vec::new();
        let mut instance_fields = Vec::new();
        let mut direct_methods = Vec::new();
        let mut virtual_methods = Vec::new();

        if def.class_data_off != 0 {
            let class_data = resolver.file().class_data_at(def.class_data_off)?;

            if static_values.len() > class_data.static_fields.len() {
                return Err(malformed_error!(
                    "Class {} declares {} static values for {} static fields",
                    ty,
                    static_values.len(),
                    class_data.static_fields.len()
                ));
            }

            for (position, member) in class_data.static_fields.iter().enumerate() {
                static_fields.push(FieldDef {
                    field: resolver.field(member.field_idx)?,
                    access_flags: AccessFlags::from_bits_retain(member.access_flags),
                    static_value: static_values.get(position).cloned(),
                });
            }

            for member in &class_data.instance_fields {
                instance_fields.push(FieldDef {
                    field: resolver.field(member.field_idx)?,
                    access_flags: AccessFlags::from_bits_retain(member.access_flags),
                    static_value: None,
                });
            }

            let import_methods =
                |members: &[crate::file::RawMethodMember],
                 out: &mut Vec<MethodDef>,
                 resolver: &mut Resolver|
                 -> Result<()> {
                    for member in members {
                        let code = if member.code_off == 0 {
                            None
                        } else {
                            let raw = resolver.file().code_at(member.code_off)?;
                            Some(import_code(resolver, &raw)?)
                        };
                        out.push(MethodDef {
                            method: resolver.method(member.method_idx)?,
                            access_flags: AccessFlags::from_bits_retain(member.access_flags),
                            code,
                        });
                    }
                    Ok(())
                };

            import_methods(&class_data.direct_methods, &mut direct_methods, resolver)?;
            import_methods(&class_data.virtual_methods, &mut virtual_methods, resolver)?;
        } else if !static_values.is_empty() {
            return Err(malformed_error!(
                "Class {} has static values but no class data",
                ty
            ));
        }

        Ok(MergedClassDefinition {
            ty,
            access_flags: AccessFlags::from_bits_retain(def.access_flags),
            superclass,
            interfaces,
            source_file,
            annotations,
            static_fields,
            instance_fields,
            direct_methods,
            virtual_methods,
        })
    }
}

/// Read one annotation_item (visibility byte plus annotation body).
fn read_annotation_item(resolver: &mut Resolver, offset: u32) -> Result<AnnotationItem> {
    let file = resolver.file();
    let mut parser = Parser::new(file.data());
    parser.seek(offset as usize)?;

    let visibility = parser.read_le::<u8>()?;
    let annotation = decode::read_annotation(&mut parser, resolver)?;
    Ok(AnnotationItem {
        visibility,
        annotation,
    })
}

/// Read a full annotation set: every item offset followed.
fn read_annotation_set(resolver: &mut Resolver, offset: u32) -> Result<Vec<AnnotationItem>> {
    let item_offsets = resolver.file().annotation_set_at(offset)?;
    let mut items = Vec::with_capacity(item_offsets.len());
    for item_offset in item_offsets {
        items.push(read_annotation_item(resolver, item_offset)?);
    }
    Ok(items)
}

/// Merge one annotations directory, re-keying each annotated member through
/// its canonical constant.
fn merge_annotations(resolver: &mut Resolver, offset: u32) -> Result<ClassAnnotations> {
    let directory = resolver.file().annotations_directory_at(offset)?;
    let mut merged = ClassAnnotations::default();

    if directory.class_annotations_off != 0 {
        merged.class = read_annotation_set(resolver, directory.class_annotations_off)?;
    }

    for (field_idx, set_off) in directory.field_annotations {
        let field = resolver.field(field_idx)?;
        let items = read_annotation_set(resolver, set_off)?;
        merged.fields.insert(field, items);
    }

    for (method_idx, set_off) in directory.method_annotations {
        let method = resolver.method(method_idx)?;
        let items = read_annotation_set(resolver, set_off)?;
        merged.methods.insert(method, items);
    }

    for (method_idx, ref_list_off) in directory.parameter_annotations {
        let method = resolver.method(method_idx)?;
        let set_offsets = resolver.file().annotation_set_ref_list_at(ref_list_off)?;

        let mut per_parameter = Vec::with_capacity(set_offsets.len());
        for set_off in set_offsets {
            if set_off == 0 {
                per_parameter.push(None);
            } else {
                per_parameter.push(Some(read_annotation_set(resolver, set_off)?));
            }
        }
        merged.parameters.insert(method, per_parameter);
    }

    Ok(merged)
}
